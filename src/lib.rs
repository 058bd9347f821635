//! Byte-exact codec for the Kafka produce path: legacy message sets (magic 0 and 1), record
//! batches (magic 2) and the produce request and response that carry them.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{DecodingError, EncodingError};
pub use protocol::{decode, encode, Decode, Encode};
