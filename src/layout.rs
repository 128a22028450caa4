use crate::config::Specialization;

/// Maps sort ranks to buffer addresses in slab layout.
///
/// Inside a slab the key of rank `lane * rows + row` is stored at `row * lanes + lane`, slabs follow each
/// other in rank order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlabLayout {
    lanes: usize,
    rows: usize,
}

impl SlabLayout {
    pub fn new(spec: &Specialization) -> Self {
        Self {
            lanes: spec.lanes,
            rows: spec.rows,
        }
    }

    #[inline(always)]
    pub fn slab_keys(&self) -> usize {
        self.lanes * self.rows
    }

    /// Address of the key at `pos` in rank order inside slab `slab`.
    #[inline(always)]
    pub fn slab_addr(&self, slab: usize, pos: usize) -> usize {
        slab * self.slab_keys() + (pos % self.rows) * self.lanes + pos / self.rows
    }

    #[inline(always)]
    pub fn addr(&self, rank: usize) -> usize {
        let slab_keys = self.slab_keys();
        self.slab_addr(rank / slab_keys, rank % slab_keys)
    }

    #[inline(always)]
    pub fn rank(&self, addr: usize) -> usize {
        let slab_keys = self.slab_keys();
        let (slab, offset) = (addr / slab_keys, addr % slab_keys);
        let (row, lane) = (offset / self.lanes, offset % self.lanes);
        slab * slab_keys + lane * self.rows + row
    }

    /// Reads a buffer in slab layout back in rank order.
    pub fn ranked<K: Copy>(&self, keys: &[K]) -> Vec<K> {
        (0..keys.len()).map(|rank| keys[self.addr(rank)]).collect()
    }
}
