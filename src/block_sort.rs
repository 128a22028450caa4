use rayon::prelude::*;

use crate::key::{Direction, Key};
use crate::network::Topology;
use crate::warp::Warp;

/// Warps of one workgroup plus the shared memory they exchange slabs through.
///
/// Shared memory holds each slab in rank order, `shared[slab * slab_keys + lane * rows + row]`.
pub(crate) struct Workgroup<K: Key> {
    pub(crate) warps: Vec<Warp<K>>,
    shared: Vec<K>,
    regs: Vec<K>,
    slab_keys: usize,
}

impl<K: Key> Workgroup<K> {
    pub(crate) fn new(topology: &Topology, warps: usize, direction: Direction) -> Self {
        let spec = &topology.spec;
        let sentinel = direction.sentinel();
        Self {
            warps: (0..warps).map(|_| Warp::new(spec.lanes, spec.rows, sentinel)).collect(),
            shared: vec![sentinel; warps * spec.slab_keys()],
            regs: Vec::with_capacity(warps),
            slab_keys: spec.slab_keys(),
        }
    }

    pub(crate) fn store_shared(&mut self) {
        for (warp, slab) in self.warps.iter().zip(self.shared.chunks_exact_mut(self.slab_keys)) {
            warp.store_ranked(slab);
        }
    }

    /// Merges sorted groups of `2^(level - 1)` slabs into sorted groups of `2^level` slabs.
    ///
    /// Expects every slab in shared memory and leaves the merged slabs both in the warps and in shared memory.
    pub(crate) fn merge_level(&mut self, topology: &Topology, level: u32, direction: Direction) {
        let network = &topology.block_merge[level as usize - 1];
        let group = 1_usize << level;
        let half = group / 2;
        let slab_keys = self.slab_keys;

        // one thread per slab position: left slabs at `pos`, right slabs at the mirrored position
        for base in (0..self.warps.len()).step_by(group) {
            for pos in 0..slab_keys {
                let addr = |i: usize| {
                    let at = if i < half { pos } else { slab_keys - 1 - pos };
                    (base + i) * slab_keys + at
                };
                self.regs.clear();
                self.regs.extend((0..group).map(|i| self.shared[addr(i)]));
                network.apply(&mut self.regs, direction);
                for (i, &key) in self.regs.iter().enumerate() {
                    self.shared[addr(i)] = key;
                }
            }
        }

        for (warp, slab) in self.warps.iter_mut().zip(self.shared.chunks_exact_mut(slab_keys)) {
            warp.load_ranked(slab);
            warp.run(&topology.slab_clean, &topology.reg_merge, direction);
            warp.store_ranked(slab);
        }
    }
}

/// Sorts one block: every warp sorts its slab, then the slabs are merged level by level.
fn sort_block<K: Key>(topology: &Topology, block: &mut [K], workgroup: &mut Workgroup<K>, direction: Direction) {
    let slab_keys = topology.spec.slab_keys();
    for (warp, slab) in workgroup.warps.iter_mut().zip(block.chunks_exact(slab_keys)) {
        warp.load(slab);
        warp.lane_network(&topology.reg_sort, direction);
        warp.run(&topology.slab_sort, &topology.reg_merge, direction);
    }

    let levels = workgroup.warps.len().trailing_zeros();
    if levels > 0 {
        workgroup.store_shared();
        for level in 1..=levels {
            workgroup.merge_level(topology, level, direction);
        }
    }

    for (warp, slab) in workgroup.warps.iter().zip(block.chunks_exact_mut(slab_keys)) {
        warp.store(slab);
    }
}

/// Block sort kernel with `warps` warps per workgroup. `keys` holds a whole number of such blocks.
pub(crate) fn block_sort<K: Key>(topology: &Topology, keys: &mut [K], warps: usize, direction: Direction) {
    let block_keys = warps * topology.spec.slab_keys();
    debug_assert_eq!(keys.len() % block_keys, 0);
    keys.par_chunks_mut(block_keys).for_each_init(
        || Workgroup::new(topology, warps, direction),
        |workgroup, block| sort_block(topology, block, workgroup, direction),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HsConfig, Specialization, TargetProfile};
    use crate::layout::SlabLayout;

    fn topology(lanes: u32, rows: u32, block_warps: u32) -> Topology {
        let config = HsConfig {
            lanes,
            rows,
            block_warps,
            ..HsConfig::default()
        };
        Topology::new(Specialization::new(config, TargetProfile::HOST).unwrap())
    }

    fn keys(n: usize, seed: u32) -> Vec<u32> {
        (0..n as u32).map(|i| (i ^ seed).wrapping_mul(2654435761) >> 7).collect()
    }

    #[test]
    fn test_block_sort_blocks() {
        let topology = topology(4, 4, 4);
        let layout = SlabLayout::new(&topology.spec);
        let block_keys = 64;
        let mut data = keys(block_keys * 3, 1);
        let original = data.clone();

        block_sort(&topology, &mut data, 4, Direction::Ascending);

        for (block, input) in data.chunks(block_keys).zip(original.chunks(block_keys)) {
            let mut expected = input.to_vec();
            expected.sort_unstable();
            assert_eq!(layout.ranked(block), expected);
        }
    }

    #[test]
    fn test_block_sort_fractional_warps() {
        let topology = topology(8, 2, 8);
        let layout = SlabLayout::new(&topology.spec);
        let mut data = keys(32, 7);
        let mut expected = data.clone();
        expected.sort_unstable_by(|a, b| b.cmp(a));

        block_sort(&topology, &mut data, 2, Direction::Descending);

        assert_eq!(layout.ranked(&data), expected);
    }

    #[test]
    fn test_block_sort_uneven_rows() {
        for rows in [3, 6, 12] {
            let topology = topology(4, rows, 4);
            let layout = SlabLayout::new(&topology.spec);
            let mut data = keys(layout.slab_keys() * 4, rows);
            let mut expected = data.clone();
            expected.sort_unstable();

            block_sort(&topology, &mut data, 4, Direction::Ascending);

            assert_eq!(layout.ranked(&data), expected, "rows {rows}");
        }
    }
}
