use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HsError, Result};
use crate::key::Key;
use crate::{BLOCK_WARPS_MAX, LANES_MAX, MAX_BLOCKS_LOG2_MAX, MERGE_LEVELS_MAX, REG_WORDS_MAX};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyWidth {
    #[default]
    Bits32,
    Bits64,
}

impl KeyWidth {
    pub fn of<K: Key>() -> Self {
        if K::WIDTH == 64 {
            KeyWidth::Bits64
        } else {
            KeyWidth::Bits32
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            KeyWidth::Bits32 => 32,
            KeyWidth::Bits64 => 64,
        }
    }

    pub fn words(self) -> u32 {
        self.bits() / 32
    }
}

/// How many merge levels a single ladder launch fuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Levels per flip-merge launch: the flip plus `flip_levels - 1` half steps.
    pub flip_levels: u32,
    /// Maximum half steps per half-merge launch.
    pub half_levels: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            flip_levels: 2,
            half_levels: 4,
        }
    }
}

/// Specialization inputs. Every field is validated by [`Specialization::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HsConfig {
    /// Lanes per warp.
    pub lanes: u32,
    /// Rows per slab, i.e. keys held in registers by each lane.
    pub rows: u32,
    /// Warps per block-sort workgroup.
    pub block_warps: u32,
    pub key_width: KeyWidth,
    /// Largest sortable array, in blocks, as a power of two.
    pub max_blocks_log2: u32,
    pub merge: MergeConfig,
}

impl Default for HsConfig {
    fn default() -> Self {
        Self {
            lanes: 32,
            rows: 16,
            block_warps: 16,
            key_width: KeyWidth::Bits32,
            max_blocks_log2: 19,
            merge: MergeConfig::default(),
        }
    }
}

impl HsConfig {
    pub fn with_key_width(mut self, key_width: KeyWidth) -> Self {
        self.key_width = key_width;
        self
    }
}

/// Capabilities of a code generation or execution target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetProfile {
    pub name: &'static str,
    /// Largest subgroup the target can shuffle across.
    pub max_lanes: u32,
    /// Target has 64-bit integer compares.
    pub native_u64: bool,
    /// Target can compare 64-bit keys held as two 32-bit words.
    pub wide_u64: bool,
}

impl TargetProfile {
    pub const HOST: TargetProfile = TargetProfile {
        name: "host",
        max_lanes: LANES_MAX,
        native_u64: true,
        wide_u64: true,
    };

    pub const OPENCL: TargetProfile = TargetProfile {
        name: "opencl",
        max_lanes: 64,
        native_u64: true,
        wide_u64: false,
    };

    pub const GLSL: TargetProfile = TargetProfile {
        name: "glsl",
        max_lanes: 64,
        native_u64: false,
        wide_u64: true,
    };

    pub const CUDA: TargetProfile = TargetProfile {
        name: "cuda",
        max_lanes: 32,
        native_u64: true,
        wide_u64: false,
    };

    pub fn supports(&self, key_width: KeyWidth) -> bool {
        match key_width {
            KeyWidth::Bits32 => true,
            KeyWidth::Bits64 => self.native_u64 || self.wide_u64,
        }
    }
}

/// Validated configuration with the derived constants every kernel is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Specialization {
    pub config: HsConfig,
    pub target: TargetProfile,
    pub lanes: usize,
    pub rows: usize,
    pub block_warps: usize,
    pub block_warps_log2: u32,
}

fn valid_pow2(value: u32, max: u32) -> bool {
    value.is_power_of_two() && value <= max
}

impl Specialization {
    pub fn new(config: HsConfig, target: TargetProfile) -> Result<Self> {
        let lanes_max = target.max_lanes.min(LANES_MAX);
        if !valid_pow2(config.lanes, lanes_max) {
            return Err(HsError::InvalidLanes {
                lanes: config.lanes,
                max: lanes_max,
            });
        }
        if !target.supports(config.key_width) {
            return Err(HsError::UnsupportedKeyWidth {
                target: target.name,
                width: config.key_width.bits(),
            });
        }
        let rows_max = REG_WORDS_MAX / config.key_width.words();
        if !(1..=rows_max).contains(&config.rows) {
            return Err(HsError::InvalidRows {
                rows: config.rows,
                max: rows_max,
            });
        }
        if !valid_pow2(config.block_warps, BLOCK_WARPS_MAX) {
            return Err(HsError::InvalidBlockWarps {
                block_warps: config.block_warps,
                max: BLOCK_WARPS_MAX,
            });
        }
        let merge = config.merge;
        let levels_ok = |levels: u32| (1..=MERGE_LEVELS_MAX).contains(&levels);
        if !levels_ok(merge.flip_levels) || !levels_ok(merge.half_levels) {
            return Err(HsError::InvalidMergeLevels {
                flip_levels: merge.flip_levels,
                half_levels: merge.half_levels,
                max: MERGE_LEVELS_MAX,
            });
        }
        if config.max_blocks_log2 > MAX_BLOCKS_LOG2_MAX {
            return Err(HsError::InvalidMaxBlocks {
                max_blocks_log2: config.max_blocks_log2,
                max: MAX_BLOCKS_LOG2_MAX,
            });
        }

        let spec = Self {
            config,
            target,
            lanes: config.lanes as usize,
            rows: config.rows as usize,
            block_warps: config.block_warps as usize,
            block_warps_log2: config.block_warps.trailing_zeros(),
        };
        debug!(
            profile = target.name,
            lanes = spec.lanes,
            rows = spec.rows,
            block_warps = spec.block_warps,
            key_bits = config.key_width.bits(),
            "specialized hotsort"
        );
        Ok(spec)
    }

    /// Keys per slab.
    #[inline(always)]
    pub fn slab_keys(&self) -> usize {
        self.lanes * self.rows
    }

    /// Keys per full block.
    #[inline(always)]
    pub fn block_keys(&self) -> usize {
        self.slab_keys() * self.block_warps
    }

    pub fn max_keys(&self) -> usize {
        let blocks = 1_usize.checked_shl(self.config.max_blocks_log2).unwrap_or(usize::MAX);
        self.block_keys().saturating_mul(blocks)
    }

    /// Log2 of the widest merge span, in slabs.
    pub fn max_span_log2(&self) -> u32 {
        self.block_warps_log2 + self.config.max_blocks_log2
    }

    /// `count` rounded up to a whole number of slabs.
    pub fn padded_len(&self, count: usize) -> usize {
        count.div_ceil(self.slab_keys()) * self.slab_keys()
    }

    pub fn flip_levels(&self) -> u32 {
        self.config.merge.flip_levels
    }

    pub fn half_levels(&self) -> u32 {
        self.config.merge.half_levels
    }
}
