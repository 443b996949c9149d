//! Sequence poolings and encoder contracts built on `ndarray`.

mod encoder;
mod error;
pub mod pooling;

pub use encoder::{EncoderSpec, take};
pub use error::{NnErr, Result};
pub use pooling::{
    Activation, AttentionParams, AttentionPooling, ConcatPooling, GroupSpec, LamaPooling,
    TemporalPooling, get_pooling,
};
