use crate::codegen::{KernelSignature, Target};
use crate::config::{KeyWidth, Specialization, TargetProfile};

/// OpenCL C with `cl_khr_subgroup_shuffle`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCl;

impl Target for OpenCl {
    fn profile(&self) -> TargetProfile {
        TargetProfile::OPENCL
    }

    fn prelude(&self, spec: &Specialization) -> String {
        let (key_type, key_max) = match spec.config.key_width {
            KeyWidth::Bits32 => ("uint", "UINT_MAX"),
            KeyWidth::Bits64 => ("ulong", "ULONG_MAX"),
        };
        format!(
            r#"#pragma OPENCL EXTENSION cl_khr_subgroups : enable
#pragma OPENCL EXTENSION cl_khr_subgroup_shuffle : enable

#define HS_KEY_TYPE {key_type}
#define HS_KEY_MIN (({key_type})0)
#define HS_KEY_MAX {key_max}
#define HS_MIN(a, b) min(a, b)
#define HS_MAX(a, b) max(a, b)

#define HS_SHUFFLE_XOR(v, m) sub_group_shuffle_xor(v, m)
#define HS_LANE_ID() get_sub_group_local_id()
#define HS_WARP_ID() get_sub_group_id()
#define HS_LOCAL_ID() ((uint)get_local_id(0))
#define HS_GROUP_ID() ((uint)get_group_id(0))
#define HS_GLOBAL_ID() ((uint)get_global_id(0))
#define HS_BARRIER() barrier(CLK_LOCAL_MEM_FENCE)
"#
        )
    }

    fn kernel_open(&self, signature: &KernelSignature) -> String {
        let mut params = "__global HS_KEY_TYPE * restrict const vout,\n  uint const slabs".to_string();
        for param in signature.params {
            params.push_str(&format!(",\n  uint const {param}"));
        }
        let mut open = format!(
            "__kernel __attribute__((reqd_work_group_size({threads}, 1, 1)))\nvoid hs_kernel_{name}({params})\n{{\n",
            threads = signature.threads,
            name = signature.name,
        );
        if signature.shared_keys > 0 {
            open.push_str(&format!("  __local HS_KEY_TYPE smem[{}];\n", signature.shared_keys));
        }
        open
    }
}
