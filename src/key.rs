use std::fmt::Debug;

/// A fixed-width unsigned key that the sorting networks can compare and exchange without branching.
///
/// `Ord` must agree with [`Key::gt`], it is only used by callers to check results.
pub trait Key: Copy + Ord + Send + Sync + Debug + 'static {
    /// Width of the key in bits.
    const WIDTH: u32;
    /// Number of 32-bit words a device stores per key.
    const WORDS: u32;
    const MIN: Self;
    const MAX: Self;

    fn gt(self, other: Self) -> bool;

    /// Returns `t` when `cond` holds and `f` otherwise, using mask arithmetic.
    fn select(cond: bool, t: Self, f: Self) -> Self;
}

impl Key for u32 {
    const WIDTH: u32 = 32;
    const WORDS: u32 = 1;
    const MIN: Self = u32::MIN;
    const MAX: Self = u32::MAX;

    #[inline(always)]
    fn gt(self, other: Self) -> bool {
        self > other
    }

    #[inline(always)]
    fn select(cond: bool, t: Self, f: Self) -> Self {
        let mask = (cond as u32).wrapping_neg();
        (t & mask) | (f & !mask)
    }
}

impl Key for u64 {
    const WIDTH: u32 = 64;
    const WORDS: u32 = 2;
    const MIN: Self = u64::MIN;
    const MAX: Self = u64::MAX;

    #[inline(always)]
    fn gt(self, other: Self) -> bool {
        self > other
    }

    #[inline(always)]
    fn select(cond: bool, t: Self, f: Self) -> Self {
        let mask = (cond as u64).wrapping_neg();
        (t & mask) | (f & !mask)
    }
}

/// A 64-bit key held as two 32-bit words, the representation used on targets without native 64-bit integers.
///
/// Field order makes the derived `Ord` compare `hi` first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U32Pair {
    pub hi: u32,
    pub lo: u32,
}

impl U32Pair {
    pub const fn new(hi: u32, lo: u32) -> Self {
        Self { hi, lo }
    }
}

impl From<u64> for U32Pair {
    fn from(value: u64) -> Self {
        Self::new((value >> 32) as u32, value as u32)
    }
}

impl From<U32Pair> for u64 {
    fn from(value: U32Pair) -> Self {
        ((value.hi as u64) << 32) | value.lo as u64
    }
}

impl Key for U32Pair {
    const WIDTH: u32 = 64;
    const WORDS: u32 = 2;
    const MIN: Self = U32Pair::new(u32::MIN, u32::MIN);
    const MAX: Self = U32Pair::new(u32::MAX, u32::MAX);

    #[inline(always)]
    fn gt(self, other: Self) -> bool {
        // same expansion the emitted GLSL uses for uvec2 keys
        (self.hi > other.hi) | ((self.hi == other.hi) & (self.lo > other.lo))
    }

    #[inline(always)]
    fn select(cond: bool, t: Self, f: Self) -> Self {
        Self::new(u32::select(cond, t.hi, f.hi), u32::select(cond, t.lo, f.lo))
    }
}

/// Sort direction. Descending inverts every compare-exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    /// The key that sorts after every other key in this direction. Padding is filled with it.
    #[inline(always)]
    pub fn sentinel<K: Key>(self) -> K {
        match self {
            Direction::Ascending => K::MAX,
            Direction::Descending => K::MIN,
        }
    }

    #[inline(always)]
    pub fn is_descending(self) -> bool {
        matches!(self, Direction::Descending)
    }
}

/// Returns `(lo, hi)` where `lo` is the key that belongs at the lower rank.
#[inline(always)]
pub fn min_max<K: Key>(a: K, b: K, direction: Direction) -> (K, K) {
    let swap = a.gt(b) ^ direction.is_descending();
    (K::select(swap, b, a), K::select(swap, a, b))
}

/// Compare-exchange in place, `a` being the lower rank.
#[inline(always)]
pub fn cmp_xchg<K: Key>(a: &mut K, b: &mut K, direction: Direction) {
    let (lo, hi) = min_max(*a, *b, direction);
    *a = lo;
    *b = hi;
}

/// One side of a compare-exchange whose partner lives in another lane.
///
/// The lane at the lower rank keeps the minimum, the other lane the maximum.
#[inline(always)]
pub fn cond_min_max<K: Key>(lower: bool, mine: K, theirs: K, direction: Direction) -> K {
    let (lo, hi) = min_max(mine, theirs, direction);
    K::select(lower, lo, hi)
}

/// Packs a 32-bit key with a 32-bit tag so the tag travels with the key through a 64-bit sort.
///
/// Equal keys are ordered by tag.
#[inline(always)]
pub fn pack_tagged(key: u32, tag: u32) -> u64 {
    ((key as u64) << 32) | tag as u64
}

#[inline(always)]
pub fn unpack_tagged(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select() {
        assert_eq!(u32::select(true, 1, 2), 1);
        assert_eq!(u32::select(false, 1, 2), 2);
        assert_eq!(u64::select(true, u64::MAX, 0), u64::MAX);
        assert_eq!(U32Pair::select(false, U32Pair::MAX, U32Pair::MIN), U32Pair::MIN);
    }

    #[test]
    fn test_pair_gt_matches_u64() {
        let values = [0_u64, 1, u32::MAX as u64, 1 << 32, (1 << 32) + 1, u64::MAX - 1, u64::MAX];
        for a in values {
            for b in values {
                assert_eq!(U32Pair::from(a).gt(U32Pair::from(b)), a > b, "{a} > {b}");
                assert_eq!(U32Pair::from(a).cmp(&U32Pair::from(b)), a.cmp(&b));
            }
        }
        assert_eq!(u64::from(U32Pair::from(0x1234_5678_9abc_def0)), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_min_max_direction() {
        assert_eq!(min_max(7_u32, 3, Direction::Ascending), (3, 7));
        assert_eq!(min_max(3_u32, 7, Direction::Ascending), (3, 7));
        assert_eq!(min_max(3_u32, 7, Direction::Descending), (7, 3));
        assert_eq!(min_max(5_u32, 5, Direction::Descending), (5, 5));

        let (mut a, mut b) = (9_u64, 2_u64);
        cmp_xchg(&mut a, &mut b, Direction::Ascending);
        assert_eq!((a, b), (2, 9));
    }

    #[test]
    fn test_cond_min_max() {
        assert_eq!(cond_min_max(true, 8_u32, 4, Direction::Ascending), 4);
        assert_eq!(cond_min_max(false, 8_u32, 4, Direction::Ascending), 8);
        assert_eq!(cond_min_max(true, 8_u32, 4, Direction::Descending), 8);
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(Direction::Ascending.sentinel::<u32>(), u32::MAX);
        assert_eq!(Direction::Descending.sentinel::<u64>(), 0);
        assert_eq!(Direction::Ascending.sentinel::<U32Pair>(), U32Pair::MAX);
    }

    #[test]
    fn test_tagged_order() {
        let a = pack_tagged(5, 900);
        let b = pack_tagged(6, 1);
        assert!(a < b);
        assert!(pack_tagged(5, 1) < a);
        assert_eq!(unpack_tagged(a), (5, 900));
    }
}
