//! Kernel source generation.
//!
//! Kernel bodies are emitted once, target independent, as invocations of `HS_*` macros. Each [`Target`]
//! supplies the macros for its shuffle, barrier, key type and min/max primitives plus the kernel prototypes.

mod cuda;
mod glsl;
mod opencl;

pub use cuda::Cuda;
pub use glsl::Glsl;
pub use opencl::OpenCl;

use tracing::debug;

use crate::config::{HsConfig, Specialization, TargetProfile};
use crate::error::{HsError, Result};
use crate::network::{Network, SlabOp, Topology};

/// What a target needs to open a kernel.
#[derive(Clone, Copy, Debug)]
pub struct KernelSignature<'a> {
    pub name: &'a str,
    /// Uniform `uint` parameters following the key buffer `vout` and `slabs`.
    pub params: &'a [&'static str],
    /// Threads per workgroup.
    pub threads: usize,
    /// Keys of workgroup shared memory, named `smem`. Zero for none.
    pub shared_keys: usize,
}

pub trait Target {
    fn profile(&self) -> TargetProfile;

    /// Extensions, key type and primitive macros. Emitted ahead of the common macros.
    fn prelude(&self, spec: &Specialization) -> String;

    fn kernel_open(&self, signature: &KernelSignature) -> String;

    fn kernel_close(&self) -> String {
        "}\n".to_string()
    }

    /// Every kernel is compiled as its own source.
    fn separate_sources(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmittedKernel {
    pub name: String,
    pub threads: usize,
    pub shared_keys: usize,
    /// Compare-exchanges in the kernel text, loop bodies counted once.
    pub cmp_xchgs: usize,
    pub source: String,
}

/// Every kernel of one specialization for one target.
#[derive(Clone, Debug)]
pub struct Module {
    pub target: &'static str,
    pub header: String,
    pub kernels: Vec<EmittedKernel>,
    separate: bool,
}

impl Module {
    /// Validates `config` against the target and emits the transpose, block sort, block clean, flip merge, half
    /// merge and slab clean kernels.
    ///
    /// Kernels index keys and slabs with 32-bit `uint`, so the specialization must not address more than `2^32`
    /// keys or span more than `2^31` slabs.
    pub fn generate(config: HsConfig, target: &dyn Target) -> Result<Self> {
        let spec = Specialization::new(config, target.profile())?;
        let span_log2 = spec.max_span_log2();
        if spec.max_keys() as u64 > 1_u64 << u32::BITS || span_log2 >= u32::BITS {
            return Err(HsError::IndexOverflow {
                max_keys: spec.max_keys(),
                span_log2,
                bits: u32::BITS,
            });
        }
        let topology = Topology::new(spec);

        let mut header = target.prelude(&spec);
        header.push_str(&common_macros(&spec));

        let mut kernels = vec![transpose(&topology, target)];
        for i in 0..=spec.block_warps_log2 {
            kernels.push(block_sort(&topology, target, spec.block_warps >> i));
        }
        for i in 1..=spec.block_warps_log2 {
            kernels.push(block_clean(&topology, target, 1 << i));
        }
        for levels in 1..=spec.flip_levels() {
            kernels.push(flip_merge(&topology, target, levels));
        }
        for levels in 1..=spec.half_levels() {
            kernels.push(half_merge(&topology, target, levels));
        }
        kernels.push(slab_clean(&topology, target));

        let module = Self {
            target: target.profile().name,
            header,
            kernels,
            separate: target.separate_sources(),
        };
        debug!(
            profile = module.target,
            kernels = module.kernels.len(),
            cmp_xchgs = module.cmp_xchgs(),
            "generated kernels"
        );
        Ok(module)
    }

    pub fn kernel(&self, name: &str) -> Option<&EmittedKernel> {
        self.kernels.iter().find(|kernel| kernel.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|kernel| kernel.name.as_str())
    }

    pub fn cmp_xchgs(&self) -> usize {
        self.kernels.iter().map(|kernel| kernel.cmp_xchgs).sum()
    }

    /// Compilation units as `(name, source)`: one per kernel for targets that need it, otherwise a single unit.
    pub fn sources(&self) -> Vec<(String, String)> {
        if self.separate {
            self.kernels
                .iter()
                .map(|kernel| (kernel.name.clone(), format!("{}\n{}", self.header, kernel.source)))
                .collect()
        } else {
            let mut source = self.header.clone();
            for kernel in &self.kernels {
                source.push('\n');
                source.push_str(&kernel.source);
            }
            vec![("hs_kernels".to_string(), source)]
        }
    }
}

/// Address of position `pos`, in rank order, of slab `slab`.
const SLAB_ADDR: &str = "((slab) * HS_SLAB_KEYS + ((pos) % HS_ROWS) * HS_LANES + (pos) / HS_ROWS)";

fn common_macros(spec: &Specialization) -> String {
    format!(
        r#"
#define HS_LANES {lanes}u
#define HS_ROWS {rows}u
#define HS_SLAB_KEYS {slab_keys}u
#define HS_BLOCK_WARPS {block_warps}u
#define HS_KEY_WORDS {words}u

#ifdef HS_SORT_DESCENDING
#define HS_SENTINEL HS_KEY_MIN
#define HS_LO(a, b) HS_MAX(a, b)
#define HS_HI(a, b) HS_MIN(a, b)
#else
#define HS_SENTINEL HS_KEY_MAX
#define HS_LO(a, b) HS_MIN(a, b)
#define HS_HI(a, b) HS_MAX(a, b)
#endif

#define HS_CMP_XCHG(a, b) {{ HS_KEY_TYPE t_ = HS_LO(a, b); b = HS_HI(a, b); a = t_; }}
#define HS_COND_MIN_MAX(lower, a, b) ((lower) ? HS_LO(a, b) : HS_HI(a, b))

#define HS_SLAB_ADDR(slab, pos) {SLAB_ADDR}
"#,
        lanes = spec.lanes,
        rows = spec.rows,
        slab_keys = spec.slab_keys(),
        block_warps = spec.block_warps,
        words = spec.config.key_width.words(),
    )
}

struct Emitter<'a> {
    topology: &'a Topology,
    out: String,
    depth: usize,
    cmp_xchgs: usize,
}

impl<'a> Emitter<'a> {
    fn new(topology: &'a Topology, target: &dyn Target, signature: &KernelSignature) -> Self {
        Self {
            topology,
            out: target.kernel_open(signature),
            depth: 1,
            cmp_xchgs: 0,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        if !text.as_ref().is_empty() {
            self.line(text);
        }
        self.line("{");
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth -= 1;
        self.line("}");
    }

    fn finish(self, target: &dyn Target, signature: &KernelSignature) -> EmittedKernel {
        let mut source = self.out;
        source.push_str(&target.kernel_close());
        EmittedKernel {
            name: signature.name.to_string(),
            threads: signature.threads,
            shared_keys: signature.shared_keys,
            cmp_xchgs: self.cmp_xchgs,
            source,
        }
    }

    fn network(&mut self, network: &Network, reg: &str) {
        for pair in network.pairs() {
            self.line(format!("HS_CMP_XCHG({reg}{}, {reg}{});", pair.a, pair.b));
            self.cmp_xchgs += 1;
        }
    }

    fn cond_min_max(&mut self, dst: &str, lower: &str, theirs: &str) {
        self.line(format!("{dst} = HS_COND_MIN_MAX({lower}, {dst}, {theirs});"));
        self.cmp_xchgs += 1;
    }

    fn slab_ops(&mut self, ops: &[SlabOp]) {
        let rows = self.topology.spec.rows;
        for op in ops {
            match *op {
                SlabOp::Flip { lanes } => {
                    self.open(format!("// flip across {lanes} lanes"));
                    self.line(format!("bool lower = (lane & {}u) == 0u;", lanes / 2));
                    for r in 0..rows.div_ceil(2) {
                        let s = rows - 1 - r;
                        self.open("");
                        self.line(format!("HS_KEY_TYPE ta = HS_SHUFFLE_XOR(r{s}, {}u);", lanes - 1));
                        if r != s {
                            self.line(format!("HS_KEY_TYPE tb = HS_SHUFFLE_XOR(r{r}, {}u);", lanes - 1));
                        }
                        self.cond_min_max(&format!("r{r}"), "lower", "ta");
                        if r != s {
                            self.cond_min_max(&format!("r{s}"), "lower", "tb");
                        }
                        self.close();
                    }
                    self.close();
                }
                SlabOp::Half { dist } => {
                    self.open(format!("// half exchange across {dist} lanes"));
                    self.line(format!("bool lower = (lane & {dist}u) == 0u;"));
                    for r in 0..rows {
                        self.open("");
                        self.line(format!("HS_KEY_TYPE t = HS_SHUFFLE_XOR(r{r}, {dist}u);"));
                        self.cond_min_max(&format!("r{r}"), "lower", "t");
                        self.close();
                    }
                    self.close();
                }
                SlabOp::RegMerge => {
                    let topology = self.topology;
                    self.network(&topology.reg_merge, "r");
                }
            }
        }
    }

    fn load_slab(&mut self, guard: Option<&str>) {
        for r in 0..self.topology.spec.rows {
            let load = format!("vout[slab_base + {r}u * HS_LANES]");
            match guard {
                Some(guard) => self.line(format!("HS_KEY_TYPE r{r} = ({guard}) ? {load} : HS_SENTINEL;")),
                None => self.line(format!("HS_KEY_TYPE r{r} = {load};")),
            }
        }
    }

    fn store_slab(&mut self) {
        for r in 0..self.topology.spec.rows {
            self.line(format!("vout[slab_base + {r}u * HS_LANES] = r{r};"));
        }
    }

    fn store_ranked(&mut self) {
        for r in 0..self.topology.spec.rows {
            self.line(format!("smem[warp * HS_SLAB_KEYS + lane * HS_ROWS + {r}u] = r{r};"));
        }
    }

    fn load_ranked(&mut self) {
        for r in 0..self.topology.spec.rows {
            self.line(format!("r{r} = smem[warp * HS_SLAB_KEYS + lane * HS_ROWS + {r}u];"));
        }
    }

    /// Merges groups of `2^level` slabs through shared memory, then cleans every slab.
    fn block_merge_level(&mut self, level: u32, warps: usize) {
        let topology = self.topology;
        let spec = &topology.spec;
        let slab_keys = spec.slab_keys();
        let group = 1_usize << level;
        let half = group / 2;
        let positions = (warps >> level) * slab_keys;
        let threads = warps * spec.lanes;

        self.open(format!(
            "for (uint idx = HS_LOCAL_ID(); idx < {positions}u; idx += {threads}u) // merge {group} slabs"
        ));
        self.line("uint pos = idx % HS_SLAB_KEYS;");
        self.line(format!("uint base = (idx / HS_SLAB_KEYS) * {}u;", group * slab_keys));
        for j in 0..group {
            let at = if j < half { "pos" } else { "(HS_SLAB_KEYS - 1u - pos)" };
            self.line(format!("HS_KEY_TYPE m{j} = smem[base + {}u + {at}];", j * slab_keys));
        }
        self.network(&topology.block_merge[level as usize - 1], "m");
        for j in 0..group {
            let at = if j < half { "pos" } else { "(HS_SLAB_KEYS - 1u - pos)" };
            self.line(format!("smem[base + {}u + {at}] = m{j};", j * slab_keys));
        }
        self.close();
        self.line("HS_BARRIER();");

        self.load_ranked();
        self.slab_ops(&topology.slab_clean);
        self.store_ranked();
        self.line("HS_BARRIER();");
    }

    /// Gathers one key per `(slab, position)` expression pair, applies `network` and scatters them back. Slabs past
    /// the buffer read as sentinels and are not stored.
    fn slab_network(&mut self, slabs: &[String], positions: &[String], guarded: &[bool], network: &Network) {
        for (j, (slab, pos)) in slabs.iter().zip(positions).enumerate() {
            self.line(format!("uint slab{j} = {slab};"));
            self.line(format!("uint pos{j} = {pos};"));
        }
        for j in 0..slabs.len() {
            let load = format!("vout[HS_SLAB_ADDR(slab{j}, pos{j})]");
            if guarded[j] {
                self.line(format!("HS_KEY_TYPE m{j} = (slab{j} < slabs) ? {load} : HS_SENTINEL;"));
            } else {
                self.line(format!("HS_KEY_TYPE m{j} = {load};"));
            }
        }
        self.network(network, "m");
        for j in 0..slabs.len() {
            let store = format!("vout[HS_SLAB_ADDR(slab{j}, pos{j})] = m{j};");
            if guarded[j] {
                self.line(format!("if (slab{j} < slabs) {store}"));
            } else {
                self.line(store);
            }
        }
    }
}

fn transpose(topology: &Topology, target: &dyn Target) -> EmittedKernel {
    let spec = &topology.spec;
    let plan = topology.transpose.as_ref();
    let signature = KernelSignature {
        name: "transpose",
        params: &[],
        threads: spec.lanes,
        shared_keys: if plan.is_some() { 0 } else { spec.slab_keys() },
    };
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint lane = HS_LANE_ID();");
    e.line("uint slab_base = HS_GROUP_ID() * HS_SLAB_KEYS + lane;");
    e.load_slab(None);
    let Some(plan) = plan else {
        // rank order through shared memory, read back row by row
        e.line("uint warp = 0u;");
        e.store_ranked();
        e.line("HS_BARRIER();");
        for r in 0..spec.rows {
            e.line(format!("vout[slab_base + {r}u * HS_LANES] = smem[{r}u * HS_LANES + lane];"));
        }
        return e.finish(target, &signature);
    };
    for stage in &plan.stages {
        let lane_mask = 1_usize << stage.lane_bit;
        let reg_mask = 1_usize << stage.reg_bit;
        e.open(format!("// lane bit {} <-> register bit {}", stage.lane_bit, stage.reg_bit));
        e.line(format!("bool upper = (lane & {lane_mask}u) != 0u;"));
        for x in (0..spec.rows).filter(|x| x & reg_mask == 0) {
            let x1 = x | reg_mask;
            e.open("");
            e.line(format!("HS_KEY_TYPE s = upper ? r{x} : r{x1};"));
            e.line(format!("HS_KEY_TYPE t = HS_SHUFFLE_XOR(s, {lane_mask}u);"));
            e.line(format!("r{x} = upper ? t : r{x};"));
            e.line(format!("r{x1} = upper ? r{x1} : t;"));
            e.close();
        }
        e.close();
    }
    for (r, row) in plan.remap.iter().enumerate() {
        e.line(format!("vout[slab_base + {row}u * HS_LANES] = r{r};"));
    }
    e.finish(target, &signature)
}

fn block_sort(topology: &Topology, target: &dyn Target, warps: usize) -> EmittedKernel {
    let spec = &topology.spec;
    let name = format!("bs_{warps}");
    let signature = KernelSignature {
        name: &name,
        params: &["first_slab"],
        threads: warps * spec.lanes,
        shared_keys: if warps > 1 { warps * spec.slab_keys() } else { 0 },
    };
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint lane = HS_LANE_ID();");
    e.line("uint warp = HS_WARP_ID();");
    e.line(format!("uint slab = first_slab + HS_GROUP_ID() * {warps}u + warp;"));
    e.line("uint slab_base = slab * HS_SLAB_KEYS + lane;");
    e.load_slab(None);
    e.network(&topology.reg_sort, "r");
    e.slab_ops(&topology.slab_sort);
    if warps > 1 {
        e.store_ranked();
        e.line("HS_BARRIER();");
        for level in 1..=warps.trailing_zeros() {
            e.block_merge_level(level, warps);
        }
    }
    e.store_slab();
    e.finish(target, &signature)
}

fn block_clean(topology: &Topology, target: &dyn Target, warps: usize) -> EmittedKernel {
    let spec = &topology.spec;
    let name = format!("bc_{warps}");
    let signature = KernelSignature {
        name: &name,
        params: &["first_slab", "active_slabs", "level_lo"],
        threads: warps * spec.lanes,
        shared_keys: warps * spec.slab_keys(),
    };
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint lane = HS_LANE_ID();");
    e.line("uint warp = HS_WARP_ID();");
    e.line("uint slab_base = (first_slab + warp) * HS_SLAB_KEYS + lane;");
    e.line("bool active = warp < active_slabs;");
    e.load_slab(Some("active"));
    e.store_ranked();
    e.line("HS_BARRIER();");
    for level in 1..=warps.trailing_zeros() {
        e.open(format!("if (level_lo <= {level}u)"));
        e.block_merge_level(level, warps);
        e.close();
    }
    e.open("if (active)");
    e.store_slab();
    e.close();
    e.finish(target, &signature)
}

/// Thread `o * HS_SLAB_KEYS + p` of a span merges position `p` of the left slabs `o, o + stride, ..` with the
/// mirrored position of the mirrored right slabs.
fn flip_merge(topology: &Topology, target: &dyn Target, levels: u32) -> EmittedKernel {
    let name = format!("fm_{levels}");
    let signature = KernelSignature {
        name: &name,
        params: &["span_log2"],
        threads: topology.spec.lanes,
        shared_keys: 0,
    };
    let half = 1_usize << (levels - 1);
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint gid = HS_GLOBAL_ID();");
    e.line("uint span = 1u << span_log2;");
    e.line(format!("uint stride = span >> {levels}u;"));
    e.line("uint threads = stride * HS_SLAB_KEYS;");
    e.line("uint span_base = (gid / threads) * span;");
    e.line("uint thread = gid % threads;");
    e.line("uint o = thread / HS_SLAB_KEYS;");
    e.line("uint p = thread % HS_SLAB_KEYS;");
    e.line("if (span_base + (span >> 1u) >= slabs) return;");

    let slabs = (0..2 * half)
        .map(|j| {
            if j < half {
                format!("span_base + o + {j}u * stride")
            } else {
                format!("span_base + (span >> 1u) + (stride - 1u - o) + {}u * stride", j - half)
            }
        })
        .collect::<Vec<_>>();
    let positions = (0..2 * half)
        .map(|j| (if j < half { "p" } else { "HS_SLAB_KEYS - 1u - p" }).to_string())
        .collect::<Vec<_>>();
    let guarded = (0..2 * half).map(|j| j >= half).collect::<Vec<_>>();
    e.slab_network(&slabs, &positions, &guarded, &topology.flip_merge[levels as usize - 1]);
    e.finish(target, &signature)
}

fn half_merge(topology: &Topology, target: &dyn Target, levels: u32) -> EmittedKernel {
    let name = format!("hm_{levels}");
    let signature = KernelSignature {
        name: &name,
        params: &["dist_log2"],
        threads: topology.spec.lanes,
        shared_keys: 0,
    };
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint gid = HS_GLOBAL_ID();");
    e.line("uint group = 2u << dist_log2;");
    e.line(format!("uint stride = group >> {levels}u;"));
    e.line("uint threads = stride * HS_SLAB_KEYS;");
    e.line("uint group_base = (gid / threads) * group;");
    e.line("uint thread = gid % threads;");
    e.line("uint o = thread / HS_SLAB_KEYS;");
    e.line("uint p = thread % HS_SLAB_KEYS;");

    let regs = 1_usize << levels;
    let slabs = (0..regs)
        .map(|j| format!("group_base + o + {j}u * stride"))
        .collect::<Vec<_>>();
    let positions = vec!["p".to_string(); regs];
    e.slab_network(&slabs, &positions, &vec![true; regs], &topology.half_merge[levels as usize - 1]);
    e.finish(target, &signature)
}

fn slab_clean(topology: &Topology, target: &dyn Target) -> EmittedKernel {
    let signature = KernelSignature {
        name: "sc",
        params: &[],
        threads: topology.spec.lanes,
        shared_keys: 0,
    };
    let mut e = Emitter::new(topology, target, &signature);
    e.line("uint lane = HS_LANE_ID();");
    e.line("uint slab_base = HS_GROUP_ID() * HS_SLAB_KEYS + lane;");
    e.load_slab(None);
    e.slab_ops(&topology.slab_clean);
    e.store_slab();
    e.finish(target, &signature)
}
