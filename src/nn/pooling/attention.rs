use ndarray::{Array2, Array3, ArrayView3, Axis, s};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;

use super::temporal::{broadcast_mask, history_len};
use crate::nn::{NnErr, Result};

/// Bound of the uniform initialization of the attention weights.
const INIT_BOUND: f32 = 3e-3;

/// How attention scores become weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Normalized over the history.
    Softmax,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "softmax" => Some(Self::Softmax),
            "tanh" => Some(Self::Tanh),
            "sigmoid" => Some(Self::Sigmoid),
            _ => None,
        }
    }

    fn apply(&self, scores: &mut Array2<f32>) {
        match self {
            Activation::Softmax => {
                for mut row in scores.rows_mut() {
                    let top = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    row.mapv_inplace(|v| (v - top).exp());
                    let total = row.sum();
                    row.mapv_inplace(|v| v / total);
                }
            }
            Activation::Tanh => scores.mapv_inplace(f32::tanh),
            Activation::Sigmoid => scores.mapv_inplace(|v| 1. / (1. + (-v).exp())),
        }
    }
}

/// Convolution settings of an attention pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttentionParams {
    pub kernel_size: usize,
    pub padding: usize,
    /// Seed of the weight initialization, random when absent.
    pub seed: Option<u64>,
}

impl Default for AttentionParams {
    fn default() -> Self {
        Self {
            kernel_size: 1,
            padding: 0,
            seed: None,
        }
    }
}

/// Attention-weighted sum over the history.
///
/// Scores come from a single-output 1-D convolution across the history with
/// zero padding.
#[derive(Debug, Clone)]
pub struct AttentionPooling {
    activation: Activation,
    padding: usize,
    // [in_features, kernel_size]
    weight: Array2<f32>,
    bias: f32,
}

impl AttentionPooling {
    /// Creates an attention pooling with weights drawn uniformly from `[-3e-3, 3e-3]`.
    pub fn new(in_features: usize, activation: Activation, params: AttentionParams) -> Result<Self> {
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let weight = Array2::from_shape_simple_fn((in_features, params.kernel_size), || {
            rng.random_range(-INIT_BOUND..INIT_BOUND)
        });
        let bias = rng.random_range(-INIT_BOUND..INIT_BOUND);

        Self::with_weights(activation, weight, bias, params.padding)
    }

    /// Creates an attention pooling from explicit convolution weights.
    ///
    /// # Arguments
    /// * `activation` - Turns scores into weights.
    /// * `weight` - Kernel of shape `[in_features, kernel_size]`.
    /// * `bias` - Added to every score.
    /// * `padding` - Zero steps added on both ends of the history.
    pub fn with_weights(
        activation: Activation,
        weight: Array2<f32>,
        bias: f32,
        padding: usize,
    ) -> Result<Self> {
        let kernel_size = weight.ncols();
        if kernel_size != 2 * padding + 1 {
            return Err(NnErr::KernelShape {
                kernel_size,
                padding,
            });
        }

        Ok(Self {
            activation,
            padding,
            weight,
            bias,
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn forward(
        &self,
        x: ArrayView3<'_, f32>,
        mask: Option<ArrayView3<'_, f32>>,
    ) -> Result<Array3<f32>> {
        let (batch, history, features) = x.dim();
        history_len(&x)?;
        if features != self.in_features() {
            return Err(NnErr::SizeMismatch {
                what: "features",
                got: features,
                expected: self.in_features(),
            });
        }

        let mut scores = self.scores(x, batch, history);
        self.activation.apply(&mut scores);
        let attention = scores.insert_axis(Axis(2));

        let weighted = match mask {
            None => &x * &attention,
            Some(mask) => {
                let mask = broadcast_mask(&mask, &x)?;
                &x * &attention * &mask
            }
        };

        Ok(weighted.sum_axis(Axis(1)).insert_axis(Axis(1)))
    }

    /// Convolves the history into one score per step: `[batch, history]`.
    fn scores(&self, x: ArrayView3<'_, f32>, batch: usize, history: usize) -> Array2<f32> {
        let mut scores = Array2::from_elem((batch, history), self.bias);
        let padding = self.padding as isize;
        let history = history as isize;

        for (tap, kernel) in self.weight.columns().into_iter().enumerate() {
            let offset = tap as isize - padding;
            let lo = (-offset).max(0);
            let hi = (history - offset).min(history);
            if lo >= hi {
                continue;
            }

            let projected = x.map_axis(Axis(2), |step| step.dot(&kernel));
            let mut dst = scores.slice_mut(s![.., lo..hi]);
            dst += &projected.slice(s![.., lo + offset..hi + offset]);
        }

        scores
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, array};

    use super::*;

    #[test]
    fn activation_keys() {
        assert_eq!(Activation::from_key("softmax"), Some(Activation::Softmax));
        assert_eq!(Activation::from_key("tanh"), Some(Activation::Tanh));
        assert_eq!(Activation::from_key("relu"), None);
    }

    #[test]
    fn zero_weights_give_uniform_softmax() {
        let pooling =
            AttentionPooling::with_weights(Activation::Softmax, Array2::zeros((2, 1)), 0.0, 0)
                .unwrap();
        let x = array![[[1.0, 4.0], [3.0, 8.0]]];

        let out = pooling.forward(x.view(), None).unwrap();
        assert_eq!(out, array![[[2.0, 6.0]]]);
    }

    #[test]
    fn softmax_prefers_high_scores() {
        // Only the first feature scores.
        let pooling =
            AttentionPooling::with_weights(Activation::Softmax, array![[10.0], [0.0]], 0.0, 0)
                .unwrap();
        let x = array![[[0.0, 1.0], [1.0, 5.0]]];

        let out = pooling.forward(x.view(), None).unwrap();
        assert!((out[[0, 0, 1]] - 5.0).abs() < 1e-3);
    }

    #[test]
    fn padded_kernel_keeps_history() {
        let weight = array![[1.0, 0.0, 1.0]];
        let pooling = AttentionPooling::with_weights(Activation::Tanh, weight, 0.0, 1).unwrap();
        let x = Array3::<f32>::ones((2, 4, 1));

        let scores = pooling.scores(x.view(), 2, 4);
        assert_eq!(scores.row(0).to_vec(), vec![1.0, 2.0, 2.0, 1.0]);
        assert_eq!(pooling.forward(x.view(), None).unwrap().shape(), &[2, 1, 1]);
    }

    #[test]
    fn length_changing_kernel_is_rejected() {
        let res = AttentionPooling::with_weights(Activation::Sigmoid, Array2::zeros((3, 2)), 0.0, 0);
        assert!(matches!(
            res,
            Err(NnErr::KernelShape {
                kernel_size: 2,
                padding: 0
            })
        ));
    }

    #[test]
    fn seeded_init_is_reproducible_and_small() {
        let params = AttentionParams {
            seed: Some(7),
            ..Default::default()
        };
        let a = AttentionPooling::new(4, Activation::Softmax, params).unwrap();
        let b = AttentionPooling::new(4, Activation::Softmax, params).unwrap();

        assert_eq!(a.weight, b.weight);
        assert_eq!(a.bias, b.bias);
        assert!(a.weight.iter().all(|w| w.abs() <= INIT_BOUND));
    }

    #[test]
    fn mask_removes_steps() {
        let pooling =
            AttentionPooling::with_weights(Activation::Sigmoid, Array2::zeros((1, 1)), 0.0, 0)
                .unwrap();
        let x = array![[[2.0], [4.0]]];
        let mask = array![[[1.0], [0.0]]];

        // sigmoid(0) = 0.5 on every step
        let out = pooling.forward(x.view(), Some(mask.view())).unwrap();
        assert_eq!(out, array![[[1.0]]]);
    }
}
