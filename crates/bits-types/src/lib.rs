pub mod chunk_key;

pub use chunk_key::{ChunkKey, KeyParseError, KEY_HEX_LEN, KEY_SIZE};
