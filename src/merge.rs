use rayon::prelude::*;

use crate::key::{Direction, Key};
use crate::layout::SlabLayout;
use crate::network::{Network, Topology};
use crate::warp::Warp;

/// Gathers `regs.len()` keys by rank, runs `network`, and scatters them back.
///
/// Ranks at or past `chunk.len()` lie beyond the padded array. They read as sentinels and are never stored.
#[inline(always)]
fn merge_thread<K: Key>(
    chunk: &mut [K],
    layout: &SlabLayout,
    regs: &mut [K],
    rank: impl Fn(usize) -> usize,
    network: &Network,
    direction: Direction,
) {
    let sentinel = direction.sentinel();
    for (j, reg) in regs.iter_mut().enumerate() {
        let rank = rank(j);
        *reg = if rank < chunk.len() { chunk[layout.addr(rank)] } else { sentinel };
    }
    network.apply(regs, direction);
    for (j, &reg) in regs.iter().enumerate() {
        let rank = rank(j);
        if rank < chunk.len() {
            chunk[layout.addr(rank)] = reg;
        }
    }
}

/// Rank of register `j` of flip merge thread `thread`, relative to the start of its span of `2^span_log2` slabs.
///
/// Thread `o * slab_keys + p` holds position `p` of every `2^(span_log2 - levels)`-th slab from `o` in the left
/// half and position `slab_keys - 1 - p` of the mirrored slabs in the right half.
#[inline(always)]
pub(crate) fn flip_merge_rank(slab_keys: usize, span_log2: u32, levels: u32, thread: usize, j: usize) -> usize {
    let span = 1_usize << span_log2;
    let stride = span >> levels;
    let half_regs = 1_usize << (levels - 1);
    let (o, p) = (thread / slab_keys, thread % slab_keys);
    if j < half_regs {
        (o + j * stride) * slab_keys + p
    } else {
        (span / 2 + (stride - 1 - o) + (j - half_regs) * stride) * slab_keys + slab_keys - 1 - p
    }
}

/// Rank of register `j` of half merge thread `thread`, relative to the start of its group of `2^(dist_log2 + 1)`
/// slabs.
#[inline(always)]
pub(crate) fn half_merge_rank(slab_keys: usize, dist_log2: u32, levels: u32, thread: usize, j: usize) -> usize {
    let stride = (1_usize << (dist_log2 + 1)) >> levels;
    let (o, p) = (thread / slab_keys, thread % slab_keys);
    (o + j * stride) * slab_keys + p
}

/// Flip merge kernel: merges pairs of sorted spans of `2^(span_log2 - 1)` slabs.
///
/// Each thread holds `2^levels` keys, so the flip is followed by `levels - 1` half steps in the same launch.
pub(crate) fn flip_merge<K: Key>(
    topology: &Topology,
    keys: &mut [K],
    span_log2: u32,
    levels: u32,
    direction: Direction,
) {
    let layout = SlabLayout::new(&topology.spec);
    let slab_keys = layout.slab_keys();
    let network = &topology.flip_merge[levels as usize - 1];
    let span = 1_usize << span_log2;
    let threads = (span >> levels) * slab_keys;

    keys.par_chunks_mut(span * slab_keys).for_each_init(
        || vec![direction.sentinel::<K>(); 1 << levels],
        |regs, chunk| {
            // no right half, the span is already sorted
            if chunk.len() <= span / 2 * slab_keys {
                return;
            }
            for thread in 0..threads {
                let rank = |j: usize| flip_merge_rank(slab_keys, span_log2, levels, thread, j);
                merge_thread(chunk, &layout, regs, rank, network, direction);
            }
        },
    );
}

/// Half merge kernel: the half steps at distances of `2^dist_log2` down to `2^(dist_log2 + 1 - levels)` slabs.
pub(crate) fn half_merge<K: Key>(
    topology: &Topology,
    keys: &mut [K],
    dist_log2: u32,
    levels: u32,
    direction: Direction,
) {
    let layout = SlabLayout::new(&topology.spec);
    let slab_keys = layout.slab_keys();
    let network = &topology.half_merge[levels as usize - 1];
    let group = 1_usize << (dist_log2 + 1);
    let threads = (group >> levels) * slab_keys;

    keys.par_chunks_mut(group * slab_keys).for_each_init(
        || vec![direction.sentinel::<K>(); 1 << levels],
        |regs, chunk| {
            for thread in 0..threads {
                let rank = |j: usize| half_merge_rank(slab_keys, dist_log2, levels, thread, j);
                merge_thread(chunk, &layout, regs, rank, network, direction);
            }
        },
    );
}

/// Slab clean kernel: one warp per slab finishes the distances inside the slab once every cross-slab distance
/// is merged.
pub(crate) fn slab_clean<K: Key>(topology: &Topology, keys: &mut [K], direction: Direction) {
    let spec = &topology.spec;
    keys.par_chunks_mut(spec.slab_keys()).for_each_init(
        || Warp::new(spec.lanes, spec.rows, direction.sentinel::<K>()),
        |warp, slab| {
            warp.load(slab);
            warp.run(&topology.slab_clean, &topology.reg_merge, direction);
            warp.store(slab);
        },
    );
}
