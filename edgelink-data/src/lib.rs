mod data;
mod metadata;
mod serialize;

pub use crate::data::EdgeData;
pub use crate::metadata::Metadata;
pub use crate::serialize::{
    decode_metadata_block, deserialize, encode_metadata, is_valid, serialize, EDGE_DATA_KEY,
    EDGE_DATA_VERSION,
};
