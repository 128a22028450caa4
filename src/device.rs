use std::sync::Arc;

use tracing::trace;

use crate::block_clean::block_clean;
use crate::block_sort::block_sort;
use crate::error::{HsError, Result};
use crate::key::Key;
use crate::merge::{flip_merge, half_merge, slab_clean};
use crate::network::Topology;
use crate::plan::{Kernel, Launch};
use crate::transpose::transpose;

/// Executes kernel launches against a key buffer.
///
/// A launch returning is the fence: everything it wrote is visible to the next launch.
pub trait Device<K: Key> {
    fn launch(&mut self, launch: &Launch, keys: &mut [K]) -> Result<()>;
}

/// Runs every kernel on the host, workgroups and merge threads spread over the rayon pool.
#[derive(Clone, Debug)]
pub struct HostDevice {
    topology: Arc<Topology>,
}

impl HostDevice {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self { topology }
    }

    fn check(&self, kernel: &Kernel, ok: bool, reason: impl FnOnce() -> String) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(HsError::Launch {
                kernel: kernel.name(),
                reason: reason(),
            })
        }
    }

    fn check_warps(&self, kernel: &Kernel, warps: usize) -> Result<()> {
        let block_warps = self.topology.spec.block_warps;
        self.check(kernel, warps.is_power_of_two() && warps <= block_warps, || {
            format!("{warps} warps per workgroup, specialized for at most {block_warps}")
        })
    }

    fn check_slabs(&self, kernel: &Kernel, first_slab: usize, slabs: usize, total: usize) -> Result<()> {
        self.check(kernel, first_slab + slabs <= total, || {
            format!("slabs {first_slab}..{} outside of {total}", first_slab + slabs)
        })
    }

    fn check_levels(&self, kernel: &Kernel, levels: u32, max: u32) -> Result<()> {
        self.check(kernel, (1..=max).contains(&levels), || {
            format!("{levels} fused levels, specialized for 1..={max}")
        })
    }
}

impl<K: Key> Device<K> for HostDevice {
    fn launch(&mut self, launch: &Launch, keys: &mut [K]) -> Result<()> {
        let topology = self.topology.as_ref();
        let spec = &topology.spec;
        let slab_keys = spec.slab_keys();
        let kernel = &launch.kernel;
        let len = launch.slabs * slab_keys;
        self.check(kernel, keys.len() >= len, || {
            format!("buffer holds {} keys, launch covers {len}", keys.len())
        })?;
        let keys = &mut keys[..len];
        let direction = launch.direction;

        trace!(kernel = %kernel.name(), slabs = launch.slabs, ?direction, "launch");

        match *kernel {
            Kernel::BlockSort {
                warps,
                first_slab,
                blocks,
            } => {
                self.check_warps(kernel, warps)?;
                self.check_slabs(kernel, first_slab, warps * blocks, launch.slabs)?;
                let range = first_slab * slab_keys..(first_slab + warps * blocks) * slab_keys;
                block_sort(topology, &mut keys[range], warps, direction);
            }
            Kernel::BlockClean {
                warps,
                first_slab,
                slabs,
                level_lo,
            } => {
                self.check_warps(kernel, warps)?;
                self.check(kernel, slabs <= warps && level_lo >= 1, || {
                    format!("{slabs} slabs from level {level_lo} in a workgroup of {warps} warps")
                })?;
                self.check_slabs(kernel, first_slab, slabs, launch.slabs)?;
                let range = first_slab * slab_keys..(first_slab + slabs) * slab_keys;
                block_clean(topology, &mut keys[range], warps, level_lo, direction);
            }
            Kernel::FlipMerge { span_log2, levels } => {
                // the left half of the span must end inside the buffer
                let fits = (1..usize::BITS).contains(&span_log2) && (1_usize << (span_log2 - 1)) < launch.slabs;
                self.check(kernel, fits, || {
                    format!("span of 2^{span_log2} slabs does not merge anything in {} slabs", launch.slabs)
                })?;
                self.check_levels(kernel, levels, spec.flip_levels().min(span_log2))?;
                flip_merge(topology, keys, span_log2, levels, direction);
            }
            Kernel::HalfMerge { dist_log2, levels } => {
                let fits = dist_log2 < usize::BITS - 1 && (1_usize << dist_log2) < launch.slabs;
                self.check(kernel, fits, || {
                    format!("distance of 2^{dist_log2} slabs reaches past {} slabs", launch.slabs)
                })?;
                self.check_levels(kernel, levels, spec.half_levels().min(dist_log2 + 1))?;
                half_merge(topology, keys, dist_log2, levels, direction);
            }
            Kernel::SlabClean => slab_clean(topology, keys, direction),
            Kernel::Transpose => transpose(topology, keys),
        }
        Ok(())
    }
}
