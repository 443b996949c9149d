//! Poolings over the history axis of `[batch, history, features]` inputs.

mod attention;
mod lama;
mod temporal;

use ndarray::{Array3, ArrayView3, s};

pub use attention::{Activation, AttentionParams, AttentionPooling};
pub use lama::{DEFAULT_GROUPS, GroupSpec, LamaPooling};
pub use temporal::ConcatPooling;

use super::{NnErr, Result};
use temporal::{broadcast_mask, history_len};

const DROP_LAST: &str = "droplast";

/// A pooling that turns `[batch, history, features]` into `[batch, 1, features]`.
#[derive(Debug, Clone)]
pub enum TemporalPooling {
    Last,
    Avg,
    Max,
    Attention(AttentionPooling),
    /// Pools everything but the last step.
    DropLast(Box<TemporalPooling>),
}
use TemporalPooling::*;

impl TemporalPooling {
    pub fn forward(
        &self,
        x: ArrayView3<'_, f32>,
        mask: Option<ArrayView3<'_, f32>>,
    ) -> Result<Array3<f32>> {
        match self {
            Last => temporal::last(x),
            Avg => temporal::avg(x, mask),
            Max => temporal::max(x, mask),
            Attention(p) => p.forward(x, mask),
            DropLast(inner) => {
                history_len(&x)?;
                let mask = match mask {
                    Some(ref mask) => Some(broadcast_mask(mask, &x)?),
                    None => None,
                };

                let x = x.slice(s![.., ..-1, ..]);
                let mask = mask.as_ref().map(|m| m.slice(s![.., ..-1, ..]));
                inner.forward(x, mask)
            }
        }
    }
}

/// Builds the pooling named by `key`.
///
/// The part of `key` before the first `_` picks the pooling (`last`, `avg`,
/// `max`, `softmax`, `tanh`, `sigmoid`); a key containing `droplast` wraps it
/// in `DropLast`, except for `last` which is returned as is.
///
/// # Arguments
/// * `key` - The pooling key, e.g. `avg_droplast`.
/// * `in_features` - Feature size of the inputs.
/// * `params` - Convolution settings, only used by attention poolings.
pub fn get_pooling(key: &str, in_features: usize, params: AttentionParams) -> Result<TemporalPooling> {
    let kind = key.split('_').next().unwrap_or(key);

    let layer = match kind {
        "last" => return Ok(Last),
        "avg" => Avg,
        "max" => Max,
        _ => match Activation::from_key(kind) {
            Some(activation) => Attention(AttentionPooling::new(in_features, activation, params)?),
            None => return Err(NnErr::UnknownPooling(key.to_string())),
        },
    };

    if key.contains(DROP_LAST) {
        return Ok(DropLast(Box::new(layer)));
    }

    Ok(layer)
}
