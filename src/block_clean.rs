use crate::block_sort::Workgroup;
use crate::key::{Direction, Key};
use crate::network::Topology;

/// First block merge level a tail of `slabs` slabs needs once each power-of-two piece of it is sorted.
///
/// Below that level every group is either inside one piece or holds only the smallest piece followed by
/// sentinels, both already sorted. Returns `None` when the tail is a single piece.
pub fn clean_level(slabs: usize) -> Option<u32> {
    if slabs.count_ones() < 2 {
        return None;
    }
    let without_lowest = slabs & (slabs - 1);
    Some(without_lowest.trailing_zeros() + 1)
}

/// Block clean kernel: one workgroup of `warps` warps merges the sorted pieces in `keys`.
///
/// Warps past the end of `keys` hold sentinels and are never stored.
pub(crate) fn block_clean<K: Key>(
    topology: &Topology,
    keys: &mut [K],
    warps: usize,
    level_lo: u32,
    direction: Direction,
) {
    let slab_keys = topology.spec.slab_keys();
    let mut workgroup = Workgroup::new(topology, warps, direction);

    for (warp, slab) in workgroup.warps.iter_mut().zip(keys.chunks_exact(slab_keys)) {
        warp.load(slab);
    }
    workgroup.store_shared();

    for level in level_lo..=warps.trailing_zeros() {
        workgroup.merge_level(topology, level, direction);
    }

    for (warp, slab) in workgroup.warps.iter().zip(keys.chunks_exact_mut(slab_keys)) {
        warp.store(slab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_sort::block_sort;
    use crate::config::{HsConfig, Specialization, TargetProfile};
    use crate::layout::SlabLayout;

    #[test]
    fn test_clean_level() {
        assert_eq!(clean_level(1), None);
        assert_eq!(clean_level(4), None);
        assert_eq!(clean_level(3), Some(2));
        assert_eq!(clean_level(5), Some(3));
        assert_eq!(clean_level(6), Some(3));
        assert_eq!(clean_level(7), Some(2));
        assert_eq!(clean_level(13), Some(3));
    }

    #[test]
    fn test_block_clean_tail() {
        let config = HsConfig {
            lanes: 4,
            rows: 2,
            block_warps: 8,
            ..HsConfig::default()
        };
        let topology = Topology::new(Specialization::new(config, TargetProfile::HOST).unwrap());
        let layout = SlabLayout::new(&topology.spec);
        let slab_keys = 8;

        for tail in 2..8_usize {
            let mut data = (0..(tail * slab_keys) as u32).map(|i| (i * 37 + tail as u32) % 23).collect::<Vec<_>>();
            let mut expected = data.clone();
            expected.sort_unstable();

            // sort the power-of-two pieces, largest first
            let mut first = 0;
            for bit in (0..usize::BITS).rev().filter(|bit| tail & (1 << bit) != 0) {
                let warps = 1 << bit;
                block_sort(&topology, &mut data[first * slab_keys..(first + warps) * slab_keys], warps, Direction::Ascending);
                first += warps;
            }
            if let Some(level_lo) = clean_level(tail) {
                block_clean(&topology, &mut data, tail.next_power_of_two(), level_lo, Direction::Ascending);
            }

            assert_eq!(layout.ranked(&data), expected, "tail {tail}");
        }
    }
}
