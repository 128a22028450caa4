use crate::codegen::{KernelSignature, Target};
use crate::config::{KeyWidth, Specialization, TargetProfile};

#[derive(Clone, Copy, Debug, Default)]
pub struct Cuda;

impl Target for Cuda {
    fn profile(&self) -> TargetProfile {
        TargetProfile::CUDA
    }

    fn prelude(&self, spec: &Specialization) -> String {
        let (key_type, key_max) = match spec.config.key_width {
            KeyWidth::Bits32 => ("uint", "0xFFFFFFFFu"),
            KeyWidth::Bits64 => ("unsigned long long", "0xFFFFFFFFFFFFFFFFull"),
        };
        format!(
            r#"typedef unsigned int uint;

#define HS_KEY_TYPE {key_type}
#define HS_KEY_MIN ((HS_KEY_TYPE)0)
#define HS_KEY_MAX {key_max}
#define HS_MIN(a, b) min(a, b)
#define HS_MAX(a, b) max(a, b)

#define HS_SHUFFLE_XOR(v, m) __shfl_xor_sync(0xFFFFFFFFu, v, m, {lanes})
#define HS_LANE_ID() (threadIdx.x & ({lanes}u - 1u))
#define HS_WARP_ID() (threadIdx.x / {lanes}u)
#define HS_LOCAL_ID() threadIdx.x
#define HS_GROUP_ID() blockIdx.x
#define HS_GLOBAL_ID() (blockIdx.x * blockDim.x + threadIdx.x)
#define HS_BARRIER() __syncthreads()
"#,
            lanes = spec.lanes,
        )
    }

    fn kernel_open(&self, signature: &KernelSignature) -> String {
        let mut params = "HS_KEY_TYPE * __restrict__ const vout,\n  uint const slabs".to_string();
        for param in signature.params {
            params.push_str(&format!(",\n  uint const {param}"));
        }
        let mut open = format!(
            "extern \"C\" __global__ void __launch_bounds__({threads})\nhs_kernel_{name}({params})\n{{\n",
            threads = signature.threads,
            name = signature.name,
        );
        if signature.shared_keys > 0 {
            open.push_str(&format!("  __shared__ HS_KEY_TYPE smem[{}];\n", signature.shared_keys));
        }
        open
    }
}
