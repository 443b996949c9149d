use ndarray::{Array2, Array3, ArrayView3, Axis, concatenate};
use serde::Deserialize;

use super::{AttentionParams, TemporalPooling, get_pooling};
use crate::nn::{NnErr, Result};

/// Groups used when none are given.
pub const DEFAULT_GROUPS: &[&str] = &["last", "avg_droplast", "max_droplast", "softmax_droplast"];

/// One pooling group of a [`LamaPooling`]: either a bare key or a key with
/// attention settings, e.g. `{"key": "tanh", "kernel_size": 3, "padding": 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GroupSpec {
    Key(String),
    Configured {
        key: String,
        #[serde(default = "default_kernel_size")]
        kernel_size: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
}

fn default_kernel_size() -> usize {
    AttentionParams::default().kernel_size
}

impl GroupSpec {
    pub fn key(&self) -> &str {
        match self {
            GroupSpec::Key(key) | GroupSpec::Configured { key, .. } => key,
        }
    }

    pub fn params(&self) -> AttentionParams {
        match *self {
            GroupSpec::Key(_) => AttentionParams::default(),
            GroupSpec::Configured {
                kernel_size,
                padding,
                seed,
                ..
            } => AttentionParams {
                kernel_size,
                padding,
                seed,
            },
        }
    }
}

impl From<&str> for GroupSpec {
    fn from(key: &str) -> Self {
        GroupSpec::Key(key.to_string())
    }
}

/// Concatenation of several temporal poolings of the same sequence.
#[derive(Debug, Clone)]
pub struct LamaPooling {
    in_features: usize,
    groups: Vec<(String, TemporalPooling)>,
}

impl LamaPooling {
    /// Creates a new `LamaPooling`.
    ///
    /// # Arguments
    /// * `in_features` - Feature size of the pooled sequences.
    /// * `groups` - The poolings to concatenate, `DEFAULT_GROUPS` when absent or empty.
    ///
    /// # Returns
    /// The pooling or an error if a group key is unknown or given twice.
    pub fn new(in_features: usize, groups: Option<Vec<GroupSpec>>) -> Result<Self> {
        let specs = match groups {
            Some(groups) if !groups.is_empty() => groups,
            _ => DEFAULT_GROUPS.iter().copied().map(GroupSpec::from).collect(),
        };

        let mut layers: Vec<(String, TemporalPooling)> = Vec::with_capacity(specs.len());
        for spec in specs {
            let key = spec.key();
            if layers.iter().any(|(k, _)| k == key) {
                return Err(NnErr::DuplicateGroup(key.to_string()));
            }

            let layer = get_pooling(key, in_features, spec.params())?;
            layers.push((key.to_string(), layer));
        }

        Ok(Self {
            in_features,
            groups: layers,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.in_features * self.groups.len()
    }

    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(key, _)| key.as_str())
    }

    /// `[batch, history, features]` -> `[batch, groups * features]`
    pub fn forward(
        &self,
        x: ArrayView3<'_, f32>,
        mask: Option<ArrayView3<'_, f32>>,
    ) -> Result<Array2<f32>> {
        let (batch, _, features) = x.dim();
        if features != self.in_features {
            return Err(NnErr::SizeMismatch {
                what: "features",
                got: features,
                expected: self.in_features,
            });
        }

        let pooled = self
            .groups
            .iter()
            .map(|(_, layer)| layer.forward(x.view(), mask.as_ref().map(|m| m.view())))
            .collect::<Result<Vec<Array3<f32>>>>()?;

        // [batch, 1, features] pieces side by side along the feature axis.
        let views: Vec<_> = pooled.iter().map(|p| p.view()).collect();
        let joined = concatenate(Axis(2), &views)?.remove_axis(Axis(1));
        debug_assert_eq!(joined.dim(), (batch, self.out_features()));

        Ok(joined)
    }
}
