// Topology generation: the compare-exchange networks and the transpose butterfly for one specialization.
//
// Every network uses the "flip" form of bitonic sorting: each comparator puts the key that belongs at the
// lower rank into the lower index, so a single direction flag inverts the whole sort.

use crate::config::Specialization;
use crate::key::{min_max, Direction, Key};

/// Compare-exchange between two register indices, `a` being the lower rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CmpXchg {
    pub a: usize,
    pub b: usize,
}

/// An ordered list of compare-exchanges over `n` registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    n: usize,
    pairs: Vec<CmpXchg>,
}

fn push_flip(pairs: &mut Vec<CmpXchg>, n: usize, size: usize) {
    let h = size / 2;
    for base in (0..n).step_by(size) {
        for k in 0..h {
            pairs.push(CmpXchg {
                a: base + h - 1 - k,
                b: base + h + k,
            });
        }
    }
}

fn push_halves(pairs: &mut Vec<CmpXchg>, n: usize, mut d: usize) {
    while d >= 1 {
        for i in (0..n).filter(|i| i & d == 0) {
            pairs.push(CmpXchg { a: i, b: i + d });
        }
        d /= 2;
    }
}

/// Sorting network for `n` registers starting at `base`.
///
/// Sizes that are not a power of two use the next power of two with the registers past `n` dropped. Every
/// comparator moves the lower-ranked key down, so the dropped registers would only ever hold sentinels.
fn push_sort(pairs: &mut Vec<CmpXchg>, base: usize, n: usize) {
    let n_pow2 = n.next_power_of_two();
    let mut full = vec![];
    let mut size = 2;
    while size <= n_pow2 {
        push_flip(&mut full, n_pow2, size);
        push_halves(&mut full, n_pow2, size / 4);
        size *= 2;
    }
    pairs.extend(full.into_iter().filter(|pair| pair.b < n).map(|pair| CmpXchg {
        a: base + pair.a,
        b: base + pair.b,
    }));
}

/// Sorts a bitonic sequence of `n` registers: half cleaners while the pieces have even length, a full sort of
/// any odd piece.
fn push_clean(pairs: &mut Vec<CmpXchg>, n: usize) {
    let mut pieces = vec![(0, n)];
    while !pieces.is_empty() {
        let mut next = vec![];
        for (base, len) in pieces {
            if len < 2 {
                continue;
            }
            if len % 2 == 1 {
                push_sort(pairs, base, len);
                continue;
            }
            let h = len / 2;
            pairs.extend((0..h).map(|i| CmpXchg { a: base + i, b: base + h + i }));
            next.push((base, h));
            next.push((base + h, h));
        }
        pieces = next;
    }
}

impl Network {
    /// Sorts `n` registers.
    pub fn sort(n: usize) -> Self {
        let mut pairs = vec![];
        push_sort(&mut pairs, 0, n);
        Self { n, pairs }
    }

    /// Sorts `n` registers holding a bitonic sequence, e.g. a merge whose distances above `n / 2` are done.
    pub fn half(n: usize) -> Self {
        let mut pairs = vec![];
        push_clean(&mut pairs, n);
        Self { n, pairs }
    }

    /// Mirrors the lower half of `n` registers against the upper half.
    pub fn flip(n: usize) -> Self {
        debug_assert!(n.is_power_of_two() && n >= 2);
        let mut pairs = vec![];
        push_flip(&mut pairs, n, n);
        Self { n, pairs }
    }

    /// Merges two sorted halves: the flip, then a half network on each side.
    pub fn merge(n: usize) -> Self {
        debug_assert!(n.is_power_of_two() && n >= 2);
        let mut pairs = vec![];
        push_flip(&mut pairs, n, n);
        push_halves(&mut pairs, n, n / 4);
        Self { n, pairs }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[CmpXchg] {
        &self.pairs
    }

    #[inline(always)]
    pub fn apply<K: Key>(&self, regs: &mut [K], direction: Direction) {
        debug_assert_eq!(regs.len(), self.n);
        for &CmpXchg { a, b } in &self.pairs {
            let (lo, hi) = min_max(regs[a], regs[b], direction);
            regs[a] = lo;
            regs[b] = hi;
        }
    }
}

/// One step of the warp-level schedule that turns sorted lanes into a sorted slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlabOp {
    /// Lane `l` exchanges with lane `l ^ (lanes - 1)`, register `r` against the partner's `rows - 1 - r`.
    Flip { lanes: usize },
    /// Lane `l` exchanges with lane `l ^ dist`, register for register.
    Half { dist: usize },
    /// The register half network inside every lane.
    RegMerge,
}

/// Stage of the transpose: swaps the role of a lane index bit and a register index bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Butterfly {
    pub lane_bit: u32,
    pub reg_bit: u32,
}

/// The butterfly stages and the store remap that turn a sorted slab into linear order.
///
/// Only exists when lanes and rows are both powers of two. Other slabs are transposed through shared memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransposePlan {
    pub stages: Vec<Butterfly>,
    /// Row each register is stored to after the stages.
    pub remap: Vec<usize>,
}

impl TransposePlan {
    pub fn new(lanes: usize, rows: usize) -> Option<Self> {
        if !lanes.is_power_of_two() || !rows.is_power_of_two() {
            return None;
        }
        let (lanes_log2, rows_log2) = (lanes.trailing_zeros(), rows.trailing_zeros());

        // Rank bits of a sorted slab: rank = lane * rows + row.
        // lane_holds[j] / reg_holds[k] track which rank bit each index bit currently carries.
        let mut lane_holds = (0..lanes_log2).map(|j| rows_log2 + j).collect::<Vec<u32>>();
        let mut reg_holds = (0..rows_log2).collect::<Vec<u32>>();
        let mut stages = vec![];

        // Linear order stores rank bit j in lane bit j. Rank bit j is always either in place or held by a
        // register bit by the time lane bit j is visited.
        for a in 0..lanes_log2 {
            if let Some(b) = reg_holds.iter().position(|&bit| bit == a) {
                std::mem::swap(&mut lane_holds[a as usize], &mut reg_holds[b]);
                stages.push(Butterfly {
                    lane_bit: a,
                    reg_bit: b as u32,
                });
            }
        }

        let remap = (0..rows)
            .map(|x| {
                reg_holds
                    .iter()
                    .enumerate()
                    .map(|(k, &bit)| ((x >> k) & 1) << (bit - lanes_log2))
                    .sum()
            })
            .collect();

        Some(Self { stages, remap })
    }
}

/// All networks and schedules of one specialization. Immutable once built and shared between sorters.
#[derive(Clone, Debug)]
pub struct Topology {
    pub spec: Specialization,
    /// Sorts the registers of one lane.
    pub reg_sort: Network,
    /// Half network over the registers of one lane.
    pub reg_merge: Network,
    /// Turns lanes sorted by `reg_sort` into a sorted slab.
    pub slab_sort: Vec<SlabOp>,
    /// Finishes a slab whose cross-slab distances are done.
    pub slab_clean: Vec<SlabOp>,
    /// Block merge networks, index `k - 1` merges groups of `2^k` slabs.
    pub block_merge: Vec<Network>,
    /// Flip-merge networks, index `m - 1` fuses `m` levels.
    pub flip_merge: Vec<Network>,
    /// Half-merge networks, index `m - 1` fuses `m` levels.
    pub half_merge: Vec<Network>,
    /// Butterfly transpose, `None` when the slab goes through shared memory instead.
    pub transpose: Option<TransposePlan>,
}

impl Topology {
    pub fn new(spec: Specialization) -> Self {
        let (lanes, rows) = (spec.lanes, spec.rows);

        let mut slab_sort = vec![];
        let mut f = 2;
        while f <= lanes {
            slab_sort.push(SlabOp::Flip { lanes: f });
            let mut dist = f / 4;
            while dist >= 1 {
                slab_sort.push(SlabOp::Half { dist });
                dist /= 2;
            }
            slab_sort.push(SlabOp::RegMerge);
            f *= 2;
        }

        let mut slab_clean = vec![];
        let mut dist = lanes / 2;
        while dist >= 1 {
            slab_clean.push(SlabOp::Half { dist });
            dist /= 2;
        }
        slab_clean.push(SlabOp::RegMerge);

        let block_merge = (1..=spec.block_warps_log2).map(|k| Network::merge(1 << k)).collect();
        let flip_merge = (1..=spec.flip_levels()).map(|m| Network::merge(1 << m)).collect();
        let half_merge = (1..=spec.half_levels()).map(|m| Network::half(1 << m)).collect();

        Self {
            spec,
            reg_sort: Network::sort(rows),
            reg_merge: Network::half(rows),
            slab_sort,
            slab_clean,
            block_merge,
            flip_merge,
            half_merge,
            transpose: TransposePlan::new(lanes, rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HsConfig, TargetProfile};

    fn zero_one(n: usize, bits: u32) -> Vec<u32> {
        (0..n).map(|i| (bits >> i) & 1).collect()
    }

    #[test]
    fn test_sort_network_zero_one() {
        for n in (1..=12).chain([16]) {
            let network = Network::sort(n);
            for bits in 0..(1_u32 << n) {
                let mut regs = zero_one(n, bits);
                network.apply(&mut regs, Direction::Ascending);
                assert!(regs.is_sorted(), "n={n} bits={bits:b} {regs:?}");

                let mut regs = zero_one(n, bits);
                network.apply(&mut regs, Direction::Descending);
                assert!(regs.windows(2).all(|w| w[0] >= w[1]), "n={n} bits={bits:b} {regs:?}");
            }
        }
    }

    #[test]
    fn test_merge_network_zero_one() {
        for n in [2, 4, 8, 16, 32] {
            let h = n / 2;
            let network = Network::merge(n);
            for left in 0..=h {
                for right in 0..=h {
                    // sorted halves with `left` and `right` zeros
                    let mut regs = (0..n)
                        .map(|i| if i < h { (i >= left) as u32 } else { (i - h >= right) as u32 })
                        .collect::<Vec<_>>();
                    network.apply(&mut regs, Direction::Ascending);
                    assert!(regs.is_sorted(), "n={n} left={left} right={right} {regs:?}");
                }
            }
        }
    }

    #[test]
    fn test_half_network_cyclic_bitonic() {
        for n in 1..=24 {
            let network = Network::half(n);
            for ones in 0..=n {
                for start in 0..n {
                    let regs = (0..n).map(|i| ((i + n - start) % n < ones) as u32).collect::<Vec<_>>();

                    let mut ascending = regs.clone();
                    network.apply(&mut ascending, Direction::Ascending);
                    assert!(ascending.is_sorted(), "n={n} {regs:?} {ascending:?}");

                    let mut descending = regs.clone();
                    network.apply(&mut descending, Direction::Descending);
                    assert!(descending.windows(2).all(|w| w[0] >= w[1]), "n={n} {regs:?} {descending:?}");
                }
            }
        }
    }

    #[test]
    fn test_network_sizes() {
        assert_eq!(Network::flip(8).len(), 4);
        assert_eq!(Network::half(8).len(), 12);
        assert_eq!(Network::merge(8).len(), 4 + 8);
        assert_eq!(Network::sort(1).len(), 0);
        assert_eq!(Network::sort(4).len(), 2 + 2 + 2);
        // odd pieces of a clean are sorted outright
        assert_eq!(Network::half(6).len(), 3 + 2 * Network::sort(3).len());
        assert!(Network::sort(6).pairs().iter().all(|pair| pair.a < pair.b && pair.b < 6));
        assert_eq!(Network::flip(4).pairs(), &[CmpXchg { a: 1, b: 2 }, CmpXchg { a: 0, b: 3 }]);
    }

    #[test]
    fn test_slab_schedule() {
        let config = HsConfig {
            lanes: 8,
            rows: 4,
            block_warps: 4,
            ..HsConfig::default()
        };
        let spec = Specialization::new(config, TargetProfile::HOST).unwrap();
        let topology = Topology::new(spec);
        assert_eq!(
            topology.slab_sort,
            vec![
                SlabOp::Flip { lanes: 2 },
                SlabOp::RegMerge,
                SlabOp::Flip { lanes: 4 },
                SlabOp::Half { dist: 1 },
                SlabOp::RegMerge,
                SlabOp::Flip { lanes: 8 },
                SlabOp::Half { dist: 2 },
                SlabOp::Half { dist: 1 },
                SlabOp::RegMerge,
            ]
        );
        assert_eq!(
            topology.slab_clean,
            vec![SlabOp::Half { dist: 4 }, SlabOp::Half { dist: 2 }, SlabOp::Half { dist: 1 }, SlabOp::RegMerge]
        );
        assert_eq!(topology.block_merge.len(), 2);
        assert_eq!(topology.flip_merge.len(), 2);
        assert_eq!(topology.half_merge.len(), 4);
    }

    fn check_transpose_plan(lanes_log2: u32, rows_log2: u32) {
        let (lanes, rows) = (1_usize << lanes_log2, 1_usize << rows_log2);
        let plan = TransposePlan::new(lanes, rows).unwrap();

        // slot (lane, reg) starts with the rank it holds in a sorted slab
        let mut slots = vec![0_usize; lanes * rows];
        for lane in 0..lanes {
            for reg in 0..rows {
                slots[reg * lanes + lane] = lane * rows + reg;
            }
        }
        for stage in &plan.stages {
            let (a, b) = (1 << stage.lane_bit, 1 << stage.reg_bit);
            let mut next = slots.clone();
            for lane in 0..lanes {
                for reg in 0..rows {
                    let from_lane = (lane & !a) | if reg & b != 0 { a } else { 0 };
                    let from_reg = (reg & !b) | if lane & a != 0 { b } else { 0 };
                    next[reg * lanes + lane] = slots[from_reg * lanes + from_lane];
                }
            }
            slots = next;
        }
        for lane in 0..lanes {
            for reg in 0..rows {
                let rank = slots[reg * lanes + lane];
                assert_eq!(plan.remap[reg] * lanes + lane, rank, "w={lanes_log2} r={rows_log2}");
            }
        }
    }

    #[test]
    fn test_transpose_plan() {
        for lanes_log2 in 0..=6 {
            for rows_log2 in 0..=5 {
                check_transpose_plan(lanes_log2, rows_log2);
            }
        }
        // a single row is already linear
        assert!(TransposePlan::new(32, 1).unwrap().stages.is_empty());
        assert!(TransposePlan::new(32, 24).is_none());
        let plan = TransposePlan::new(32, 16).unwrap();
        assert_eq!(plan.stages.len(), 5);
        assert_eq!(plan.remap, vec![0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15]);
    }
}
