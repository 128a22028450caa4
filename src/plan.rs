use crate::block_clean::clean_level;
use crate::config::Specialization;
use crate::key::Direction;

/// A kernel and its round-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Sorts `blocks` consecutive blocks of `warps` slabs each, starting at `first_slab`.
    BlockSort { warps: usize, first_slab: usize, blocks: usize },
    /// Merges the `slabs` tail slabs at `first_slab`, already sorted as power-of-two pieces.
    BlockClean {
        warps: usize,
        first_slab: usize,
        slabs: usize,
        level_lo: u32,
    },
    /// Merges sorted pairs of spans of `2^(span_log2 - 1)` slabs, fusing `levels` levels.
    FlipMerge { span_log2: u32, levels: u32 },
    /// Half steps at slab distances `2^dist_log2` down to `2^(dist_log2 + 1 - levels)`.
    HalfMerge { dist_log2: u32, levels: u32 },
    /// Finishes every slab once its cross-slab distances are merged.
    SlabClean,
    Transpose,
}

impl Kernel {
    /// Name of the generated kernel that implements this launch.
    pub fn name(&self) -> String {
        match self {
            Kernel::BlockSort { warps, .. } => format!("bs_{warps}"),
            Kernel::BlockClean { warps, .. } => format!("bc_{warps}"),
            Kernel::FlipMerge { levels, .. } => format!("fm_{levels}"),
            Kernel::HalfMerge { levels, .. } => format!("hm_{levels}"),
            Kernel::SlabClean => "sc".to_string(),
            Kernel::Transpose => "transpose".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Launch {
    pub kernel: Kernel,
    /// Slabs in the padded buffer.
    pub slabs: usize,
    pub direction: Direction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SortOptions {
    pub direction: Direction,
    /// Finish with a transpose. Callers that read slab layout directly can skip it.
    pub linearize: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Ascending,
            linearize: true,
        }
    }
}

impl SortOptions {
    pub fn descending() -> Self {
        Self {
            direction: Direction::Descending,
            ..Self::default()
        }
    }
}

/// The ordered launches that sort `count` keys. Each launch must complete before the next starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub count: usize,
    pub slabs: usize,
    launches: Vec<Launch>,
}

impl Plan {
    pub fn new(spec: &Specialization, count: usize, options: SortOptions) -> Self {
        let slabs = count.div_ceil(spec.slab_keys());
        let mut launches = vec![];
        let mut push = |kernel: Kernel| {
            launches.push(Launch {
                kernel,
                slabs,
                direction: options.direction,
            })
        };

        if slabs > 0 {
            let block_warps = spec.block_warps;
            let blocks = slabs / block_warps;
            let tail = slabs % block_warps;
            if blocks > 0 {
                push(Kernel::BlockSort {
                    warps: block_warps,
                    first_slab: 0,
                    blocks,
                });
            }

            // the tail is sorted as power-of-two pieces, largest first
            let tail_first = blocks * block_warps;
            let mut first_slab = tail_first;
            for bit in (0..usize::BITS).rev().filter(|bit| tail & (1 << bit) != 0) {
                let warps = 1 << bit;
                push(Kernel::BlockSort {
                    warps,
                    first_slab,
                    blocks: 1,
                });
                first_slab += warps;
            }
            if let Some(level_lo) = clean_level(tail) {
                push(Kernel::BlockClean {
                    warps: tail.next_power_of_two(),
                    first_slab: tail_first,
                    slabs: tail,
                    level_lo,
                });
            }

            let mut span_slabs = block_warps;
            while span_slabs < slabs {
                span_slabs *= 2;
                let span_log2 = span_slabs.trailing_zeros();
                let levels = spec.flip_levels().min(span_log2);
                push(Kernel::FlipMerge { span_log2, levels });

                let mut remaining = span_log2 - levels;
                while remaining > 0 {
                    let levels = spec.half_levels().min(remaining);
                    push(Kernel::HalfMerge {
                        dist_log2: remaining - 1,
                        levels,
                    });
                    remaining -= levels;
                }
                push(Kernel::SlabClean);
            }

            if options.linearize {
                push(Kernel::Transpose);
            }
        }

        Self { count, slabs, launches }
    }

    pub fn launches(&self) -> &[Launch] {
        &self.launches
    }

    pub fn is_empty(&self) -> bool {
        self.launches.is_empty()
    }

    /// Kernels only, in launch order.
    pub fn kernels(&self) -> impl Iterator<Item = Kernel> + '_ {
        self.launches.iter().map(|launch| launch.kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HsConfig, TargetProfile};

    fn spec() -> Specialization {
        // 512 keys per slab, 16 slabs per block
        Specialization::new(HsConfig::default(), TargetProfile::HOST).unwrap()
    }

    #[test]
    fn test_empty_plan() {
        let plan = Plan::new(&spec(), 0, SortOptions::default());
        assert!(plan.is_empty());
        assert_eq!(plan.slabs, 0);
    }

    #[test]
    fn test_single_slab_plan() {
        let plan = Plan::new(&spec(), 500, SortOptions::default());
        assert_eq!(
            plan.kernels().collect::<Vec<_>>(),
            vec![
                Kernel::BlockSort {
                    warps: 1,
                    first_slab: 0,
                    blocks: 1
                },
                Kernel::Transpose
            ]
        );
    }

    #[test]
    fn test_tail_plan() {
        let plan = Plan::new(&spec(), 512 * 16 * 2 + 512 * 11, SortOptions::default());
        assert_eq!(plan.slabs, 43);
        let kernels = plan.kernels().collect::<Vec<_>>();
        assert_eq!(
            &kernels[..5],
            &[
                Kernel::BlockSort {
                    warps: 16,
                    first_slab: 0,
                    blocks: 2
                },
                Kernel::BlockSort {
                    warps: 8,
                    first_slab: 32,
                    blocks: 1
                },
                Kernel::BlockSort {
                    warps: 2,
                    first_slab: 40,
                    blocks: 1
                },
                Kernel::BlockSort {
                    warps: 1,
                    first_slab: 42,
                    blocks: 1
                },
                Kernel::BlockClean {
                    warps: 16,
                    first_slab: 32,
                    slabs: 11,
                    level_lo: 2
                },
            ]
        );
        // 43 slabs need spans of 32 and 64 slabs
        assert_eq!(
            &kernels[5..8],
            &[
                Kernel::FlipMerge {
                    span_log2: 5,
                    levels: 2
                },
                Kernel::HalfMerge {
                    dist_log2: 2,
                    levels: 3
                },
                Kernel::SlabClean,
            ]
        );
        let flips = kernels
            .iter()
            .filter(|kernel| matches!(kernel, Kernel::FlipMerge { .. }))
            .count();
        assert_eq!(flips, 2);
        assert_eq!(kernels.last(), Some(&Kernel::Transpose));
    }

    #[test]
    fn test_half_merges_cover_every_distance() {
        let plan = Plan::new(&spec(), 512 * 16 * 4, SortOptions::default());
        let mut distances = vec![];
        for kernel in plan.kernels() {
            match kernel {
                Kernel::FlipMerge { span_log2, levels } => {
                    distances.clear();
                    distances.extend((span_log2 - levels..span_log2).rev());
                }
                Kernel::HalfMerge { dist_log2, levels } => {
                    distances.extend((dist_log2 + 1 - levels..=dist_log2).rev());
                }
                _ => {}
            }
        }
        // last span is 2^6 slabs, every round ends with the distances inside a slab
        assert_eq!(distances, (0..6).rev().collect::<Vec<u32>>());
        let kernels = plan.kernels().collect::<Vec<_>>();
        assert_eq!(kernels.iter().filter(|&&kernel| kernel == Kernel::SlabClean).count(), 2);
        assert_eq!(&kernels[kernels.len() - 2..], &[Kernel::SlabClean, Kernel::Transpose]);
    }

    #[test]
    fn test_uneven_rows_plan() {
        // 24 rows of 32 lanes: 768 keys per slab
        let config = HsConfig {
            rows: 24,
            ..HsConfig::default()
        };
        let spec = Specialization::new(config, TargetProfile::HOST).unwrap();
        let plan = Plan::new(&spec, 768 * 16 * 3, SortOptions::default());
        assert_eq!(plan.slabs, 48);
        let kernels = plan.kernels().collect::<Vec<_>>();
        assert_eq!(
            kernels[1],
            Kernel::FlipMerge {
                span_log2: 5,
                levels: 2
            }
        );
        assert!(kernels.contains(&Kernel::FlipMerge {
            span_log2: 6,
            levels: 2
        }));
    }

    #[test]
    fn test_no_linearize() {
        let options = SortOptions {
            linearize: false,
            ..SortOptions::descending()
        };
        let plan = Plan::new(&spec(), 512 * 40, options);
        assert!(plan.kernels().all(|kernel| kernel != Kernel::Transpose));
        assert!(plan.launches().iter().all(|launch| launch.direction == Direction::Descending));
    }
}
