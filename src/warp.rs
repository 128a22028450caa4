use crate::key::{cmp_xchg, cond_min_max, Direction, Key};
use crate::network::{Butterfly, Network, SlabOp};

/// Writes `src[lane ^ mask]` to `dst[lane]`, the lane shuffle every exchange goes through.
#[inline(always)]
fn shuffle_xor<K: Key>(src: &[K], mask: usize, dst: &mut [K]) {
    for (lane, value) in dst.iter_mut().enumerate() {
        *value = src[lane ^ mask];
    }
}

/// Registers of one warp executing in lockstep.
///
/// Registers are kept row-major, `regs[row * lanes + lane]`, which is also how a slab is striped in memory.
#[derive(Clone, Debug)]
pub struct Warp<K: Key> {
    lanes: usize,
    rows: usize,
    regs: Vec<K>,
    scratch: Vec<K>,
}

impl<K: Key> Warp<K> {
    pub fn new(lanes: usize, rows: usize, fill: K) -> Self {
        Self {
            lanes,
            rows,
            regs: vec![fill; lanes * rows],
            scratch: vec![fill; lanes * 2],
        }
    }

    #[cfg(test)]
    pub fn regs(&self) -> &[K] {
        &self.regs
    }

    #[cfg(test)]
    pub fn fill(&mut self, key: K) {
        self.regs.fill(key);
    }

    /// Loads a slab stored in slab layout.
    #[inline(always)]
    pub fn load(&mut self, slab: &[K]) {
        self.regs.copy_from_slice(slab);
    }

    #[inline(always)]
    pub fn store(&self, slab: &mut [K]) {
        slab.copy_from_slice(&self.regs);
    }

    /// Loads a slab held in rank order, as it sits in shared memory between block merge levels.
    pub fn load_ranked(&mut self, src: &[K]) {
        for row in 0..self.rows {
            for lane in 0..self.lanes {
                self.regs[row * self.lanes + lane] = src[lane * self.rows + row];
            }
        }
    }

    pub fn store_ranked(&self, dst: &mut [K]) {
        for row in 0..self.rows {
            for lane in 0..self.lanes {
                dst[lane * self.rows + row] = self.regs[row * self.lanes + lane];
            }
        }
    }

    /// Stores register `row` of every lane to row `remap[row]` of the slab.
    pub fn store_remapped(&self, slab: &mut [K], remap: &[usize]) {
        for (row, &target) in remap.iter().enumerate() {
            let src = &self.regs[row * self.lanes..(row + 1) * self.lanes];
            slab[target * self.lanes..(target + 1) * self.lanes].copy_from_slice(src);
        }
    }

    /// Applies a register network inside every lane.
    #[inline(always)]
    pub fn lane_network(&mut self, network: &Network, direction: Direction) {
        let lanes = self.lanes;
        for pair in network.pairs() {
            let (lo, hi) = self.regs.split_at_mut(pair.b * lanes);
            for (a, b) in lo[pair.a * lanes..(pair.a + 1) * lanes].iter_mut().zip(&mut hi[..lanes]) {
                cmp_xchg(a, b, direction);
            }
        }
    }

    /// Flip exchange across groups of `group` lanes.
    pub fn flip(&mut self, group: usize, direction: Direction) {
        let (lanes, rows) = (self.lanes, self.rows);
        let mask = group - 1;
        let upper = group / 2;
        for r in 0..rows.div_ceil(2) {
            let s = rows - 1 - r;
            let (theirs_r, theirs_s) = self.scratch.split_at_mut(lanes);
            shuffle_xor(&self.regs[s * lanes..(s + 1) * lanes], mask, theirs_r);
            shuffle_xor(&self.regs[r * lanes..(r + 1) * lanes], mask, theirs_s);
            for lane in 0..lanes {
                let lower = lane & upper == 0;
                self.regs[r * lanes + lane] = cond_min_max(lower, self.regs[r * lanes + lane], theirs_r[lane], direction);
                self.regs[s * lanes + lane] = cond_min_max(lower, self.regs[s * lanes + lane], theirs_s[lane], direction);
            }
        }
    }

    /// Half exchange between lanes `dist` apart.
    pub fn half(&mut self, dist: usize, direction: Direction) {
        let lanes = self.lanes;
        for row in self.regs.chunks_exact_mut(lanes) {
            let theirs = &mut self.scratch[..lanes];
            shuffle_xor(row, dist, theirs);
            for (lane, value) in row.iter_mut().enumerate() {
                *value = cond_min_max(lane & dist == 0, *value, theirs[lane], direction);
            }
        }
    }

    pub fn run(&mut self, ops: &[SlabOp], reg_merge: &Network, direction: Direction) {
        for op in ops {
            match *op {
                SlabOp::Flip { lanes } => self.flip(lanes, direction),
                SlabOp::Half { dist } => self.half(dist, direction),
                SlabOp::RegMerge => self.lane_network(reg_merge, direction),
            }
        }
    }

    /// One transpose stage: lanes differing in `lane_bit` trade the registers that differ in `reg_bit`.
    pub fn butterfly(&mut self, stage: Butterfly) {
        let lanes = self.lanes;
        let lane_mask = 1 << stage.lane_bit;
        let reg_mask = 1 << stage.reg_bit;
        for x in (0..self.rows).filter(|x| x & reg_mask == 0) {
            let x1 = x | reg_mask;
            let (send, recv) = self.scratch.split_at_mut(lanes);
            for (lane, value) in send.iter_mut().enumerate() {
                *value = K::select(lane & lane_mask != 0, self.regs[x * lanes + lane], self.regs[x1 * lanes + lane]);
            }
            shuffle_xor(send, lane_mask, recv);
            for (lane, &value) in recv.iter().enumerate() {
                let row = if lane & lane_mask == 0 { x1 } else { x };
                self.regs[row * lanes + lane] = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HsConfig, Specialization, TargetProfile};
    use crate::network::Topology;

    fn topology(lanes: u32, rows: u32) -> Topology {
        let config = HsConfig {
            lanes,
            rows,
            block_warps: 1,
            ..HsConfig::default()
        };
        Topology::new(Specialization::new(config, TargetProfile::HOST).unwrap())
    }

    fn sorted_slab(topology: &Topology, slab: &[u32], direction: Direction) -> Vec<u32> {
        let spec = &topology.spec;
        let mut warp = Warp::new(spec.lanes, spec.rows, 0_u32);
        warp.load(slab);
        warp.lane_network(&topology.reg_sort, direction);
        warp.run(&topology.slab_sort, &topology.reg_merge, direction);
        let mut ranked = vec![0; slab.len()];
        warp.store_ranked(&mut ranked);
        ranked
    }

    #[test]
    fn test_slab_sort() {
        for (lanes, rows) in [(1, 4), (2, 1), (4, 4), (8, 2), (32, 16), (2, 5), (4, 3), (8, 6), (32, 24)] {
            let topology = topology(lanes, rows);
            let n = (lanes * rows) as u32;
            let slab = (0..n).map(|i| i.wrapping_mul(2654435761) % 97).collect::<Vec<u32>>();

            let mut expected = slab.clone();
            expected.sort_unstable();
            assert_eq!(sorted_slab(&topology, &slab, Direction::Ascending), expected, "{lanes}x{rows}");

            expected.reverse();
            assert_eq!(sorted_slab(&topology, &slab, Direction::Descending), expected, "{lanes}x{rows}");
        }
    }

    #[test]
    fn test_ranked_roundtrip() {
        let mut warp = Warp::new(4, 2, 0_u32);
        warp.load(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut ranked = vec![0; 8];
        warp.store_ranked(&mut ranked);
        assert_eq!(ranked, vec![0, 4, 1, 5, 2, 6, 3, 7]);

        warp.fill(9);
        warp.load_ranked(&ranked);
        assert_eq!(warp.regs(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_half_exchange() {
        let mut warp = Warp::new(4, 1, 0_u32);
        warp.load(&[4, 3, 2, 1]);
        warp.half(2, Direction::Ascending);
        assert_eq!(warp.regs(), &[2, 1, 4, 3]);
        warp.half(1, Direction::Ascending);
        assert_eq!(warp.regs(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_butterfly_transposes() {
        let topology = topology(8, 4);
        let mut warp = Warp::new(8, 4, 0_u32);
        // store rank order so that the slab is "sorted"
        let ranked = (0..32).collect::<Vec<u32>>();
        warp.load_ranked(&ranked);
        let plan = topology.transpose.as_ref().unwrap();
        for &stage in &plan.stages {
            warp.butterfly(stage);
        }
        let mut slab = vec![0; 32];
        warp.store_remapped(&mut slab, &plan.remap);
        assert_eq!(slab, ranked);
    }
}
