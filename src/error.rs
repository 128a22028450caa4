/// Errors reported while specializing a sorter or launching its kernels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HsError {
    #[error("lanes per warp must be a power of two in 1..={max}, got {lanes}")]
    InvalidLanes { lanes: u32, max: u32 },

    #[error("rows per slab must be in 1..={max}, got {rows}")]
    InvalidRows { rows: u32, max: u32 },

    #[error("warps per block must be a power of two in 1..={max}, got {block_warps}")]
    InvalidBlockWarps { block_warps: u32, max: u32 },

    #[error("merge fusion levels must be in 1..={max}, got flip {flip_levels} and half {half_levels}")]
    InvalidMergeLevels { flip_levels: u32, half_levels: u32, max: u32 },

    #[error("max_blocks_log2 must be at most {max}, got {max_blocks_log2}")]
    InvalidMaxBlocks { max_blocks_log2: u32, max: u32 },

    #[error("specialized for {max_keys} keys in spans of up to 2^{span_log2} slabs, more than {bits}-bit kernel indices address")]
    IndexOverflow { max_keys: usize, span_log2: u32, bits: u32 },

    #[error("target '{target}' cannot compare {width}-bit keys")]
    UnsupportedKeyWidth { target: &'static str, width: u32 },

    #[error("sorter is specialized for {expected}-bit keys but was given {found}-bit keys")]
    KeyWidthMismatch { expected: u32, found: u32 },

    #[error("buffer holds {len} keys but sorting requires {required}")]
    BufferTooSmall { len: usize, required: usize },

    #[error("count {count} exceeds the specialized maximum of {max} keys")]
    CountTooLarge { count: usize, max: usize },

    #[error("kernel '{kernel}' failed to launch: {reason}")]
    Launch { kernel: String, reason: String },
}

/// Convenience alias for `Result<T, HsError>`.
pub type Result<T> = std::result::Result<T, HsError>;
