// kvf-common - Shared value model and storage codec for the KV facade
//
// This crate has no knowledge of keys, expiry, or connections.

pub mod codec;
pub mod error;
pub mod record;
pub mod value;

// Re-export for convenience
pub use codec::{decode, decode_as, encode, encode_into, CODEC_VERSION, MAX_DEPTH};
pub use error::*;
pub use record::{from_value, to_value};
pub use value::{CacheValue, Shape};
