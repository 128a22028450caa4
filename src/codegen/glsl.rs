use crate::codegen::{KernelSignature, Target};
use crate::config::{KeyWidth, Specialization, TargetProfile};

/// Vulkan GLSL compute shaders, one per kernel. 64-bit keys are `uvec2` with the high word in `y`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Glsl;

impl Target for Glsl {
    fn profile(&self) -> TargetProfile {
        TargetProfile::GLSL
    }

    fn prelude(&self, spec: &Specialization) -> String {
        let keys = match spec.config.key_width {
            KeyWidth::Bits32 => r#"#define HS_KEY_TYPE uint
#define HS_KEY_MIN 0u
#define HS_KEY_MAX 0xFFFFFFFFu
#define HS_MIN(a, b) min(a, b)
#define HS_MAX(a, b) max(a, b)"#,
            KeyWidth::Bits64 => r#"#define HS_KEY_TYPE uvec2
#define HS_KEY_MIN uvec2(0u, 0u)
#define HS_KEY_MAX uvec2(0xFFFFFFFFu, 0xFFFFFFFFu)
#define HS_GT(a, b) (((a).y > (b).y) || (((a).y == (b).y) && ((a).x > (b).x)))
#define HS_MIN(a, b) (HS_GT(a, b) ? (b) : (a))
#define HS_MAX(a, b) (HS_GT(a, b) ? (a) : (b))"#,
        };
        format!(
            r#"#version 460
#extension GL_KHR_shader_subgroup_basic : require
#extension GL_KHR_shader_subgroup_shuffle : require

{keys}

#define HS_SHUFFLE_XOR(v, m) subgroupShuffleXor(v, m)
#define HS_LANE_ID() gl_SubgroupInvocationID
#define HS_WARP_ID() gl_SubgroupID
#define HS_LOCAL_ID() gl_LocalInvocationID.x
#define HS_GROUP_ID() gl_WorkGroupID.x
#define HS_GLOBAL_ID() gl_GlobalInvocationID.x
#define HS_BARRIER() memoryBarrierShared(); barrier()

layout(std430, set = 0, binding = 0) buffer hs_keys
{{
  HS_KEY_TYPE vout[];
}};
"#
        )
    }

    fn kernel_open(&self, signature: &KernelSignature) -> String {
        let mut open = format!("layout(local_size_x = {}) in;\n\n", signature.threads);
        open.push_str("layout(push_constant) uniform hs_params\n{\n  uint slabs;\n");
        for param in signature.params {
            open.push_str(&format!("  uint {param};\n"));
        }
        open.push_str("};\n\n");
        if signature.shared_keys > 0 {
            open.push_str(&format!("shared HS_KEY_TYPE smem[{}];\n\n", signature.shared_keys));
        }
        open.push_str(&format!("// {}\nvoid main()\n{{\n", signature.name));
        open
    }

    fn separate_sources(&self) -> bool {
        true
    }
}
