use ndarray::{Array2, Array3, ArrayView3, Axis, Zip, s};

use crate::nn::{NnErr, Result};

/// Broadcasts `mask` to the shape of `x`.
pub(super) fn broadcast_mask<'a>(
    mask: &'a ArrayView3<'_, f32>,
    x: &ArrayView3<'_, f32>,
) -> Result<ArrayView3<'a, f32>> {
    mask.broadcast(x.raw_dim()).ok_or_else(|| NnErr::MaskShape {
        mask: mask.shape().to_vec(),
        input: x.shape().to_vec(),
    })
}

pub(super) fn history_len(x: &ArrayView3<'_, f32>) -> Result<usize> {
    match x.len_of(Axis(1)) {
        0 => Err(NnErr::EmptyHistory),
        len => Ok(len),
    }
}

/// `x[:, -1:, :]`
pub(super) fn last(x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
    history_len(&x)?;
    Ok(x.slice(s![.., -1.., ..]).to_owned())
}

/// Mean over the history, restricted to the masked-in steps when a mask is given.
pub(super) fn avg(x: ArrayView3<'_, f32>, mask: Option<ArrayView3<'_, f32>>) -> Result<Array3<f32>> {
    history_len(&x)?;

    let pooled = match mask {
        None => x.mean_axis(Axis(1)).ok_or(NnErr::EmptyHistory)?,
        Some(mask) => {
            let mask = broadcast_mask(&mask, &x)?;
            let total = (&x * &mask).sum_axis(Axis(1));
            total / mask.sum_axis(Axis(1))
        }
    };

    Ok(pooled.insert_axis(Axis(1)))
}

/// Max over the history. Masked-out steps never win; a fully masked row yields `-inf`.
pub(super) fn max(x: ArrayView3<'_, f32>, mask: Option<ArrayView3<'_, f32>>) -> Result<Array3<f32>> {
    history_len(&x)?;

    let pooled = match mask {
        None => fold_max(x),
        Some(mask) => {
            let mask = broadcast_mask(&mask, &x)?;
            let masked = Zip::from(&x)
                .and(&mask)
                .map_collect(|&v, &keep| if keep != 0.0 { v } else { f32::NEG_INFINITY });
            fold_max(masked.view())
        }
    };

    Ok(pooled.insert_axis(Axis(1)))
}

fn fold_max(values: ArrayView3<'_, f32>) -> Array2<f32> {
    values.fold_axis(Axis(1), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
}

/// Flattens the whole history into one feature vector per sample.
#[derive(Debug, Clone)]
pub struct ConcatPooling {
    in_features: usize,
    history_len: usize,
}

impl ConcatPooling {
    pub fn new(in_features: usize, history_len: usize) -> Self {
        Self {
            in_features,
            history_len,
        }
    }

    pub fn out_features(&self) -> usize {
        self.in_features * self.history_len
    }

    /// `[batch, history, features]` -> `[batch, history * features]`
    pub fn forward(&self, x: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
        let (batch, history, features) = x.dim();
        if features != self.in_features {
            return Err(NnErr::SizeMismatch {
                what: "features",
                got: features,
                expected: self.in_features,
            });
        }
        if history != self.history_len {
            return Err(NnErr::SizeMismatch {
                what: "history",
                got: history,
                expected: self.history_len,
            });
        }

        let flat = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch, history * features))?;
        Ok(flat)
    }
}
