pub mod decoder;
pub mod dynamic_table;
pub mod encoder;
pub mod huffman;
pub mod static_table;

pub use decoder::{DecodedHeader, Decoder, HpackError};
pub use encoder::{Encoder, HeaderToEncode};
