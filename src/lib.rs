//! Compression and decompression for the LZ variant used by Super Metroid
//! (Lunar Compress format 4).
//!
//! ```
//! let data = b"SMLZ SMLZ SMLZ SMLZ".to_vec();
//! let compressed = smlz::encode(data.as_slice()).unwrap();
//! let decompressed = smlz::decode(compressed.as_slice(), data.len()).unwrap();
//!
//! assert_eq!(data, decompressed);
//! ```

mod decode;
mod encode;
mod errors;
pub mod format;

pub use decode::{decode, decode_at, Decoder};
pub use encode::{encode, Dispatch, EncoderBuilder, SearchDepth};
pub use errors::{CorruptStream, SmlzError};
pub use format::Command;
