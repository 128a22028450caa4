mod block_clean;
mod block_sort;
pub mod codegen;
mod config;
mod device;
mod error;
mod key;
mod layout;
mod merge;
mod network;
mod plan;
mod sort;
mod transpose;
mod warp;

pub use config::*;
pub use device::*;
pub use error::*;
pub use key::*;
pub use layout::*;
pub use network::*;
pub use plan::*;
pub use sort::*;

// 2^5 registers per merge thread
pub(crate) const MERGE_LEVELS_MAX: u32 = 5;
pub(crate) const LANES_MAX: u32 = 64;
// 32-bit words a lane may hold in registers for one slab
pub(crate) const REG_WORDS_MAX: u32 = 128;
pub(crate) const BLOCK_WARPS_MAX: u32 = 32;
pub(crate) const MAX_BLOCKS_LOG2_MAX: u32 = 32;
