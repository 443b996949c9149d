//! Helpers for nested JSON dictionaries carried around with batches and configs.

use std::{error::Error, fmt};

use serde_json::{Map, Value};

/// A JSON object with insertion order preserved.
pub type Dict = Map<String, Value>;

/// The dict module's result type.
pub type Result<T> = std::result::Result<T, DictErr>;

const ALL_KEYS: &str = "__all__";

#[derive(Debug, Clone, PartialEq)]
pub enum DictErr {
    MissingKey(String),
    UnsupportedSelector(Value),
    NotAnArray(String),
}

impl fmt::Display for DictErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictErr::MissingKey(key) => write!(f, "key {key:?} is missing"),
            DictErr::UnsupportedSelector(v) => write!(f, "cannot select keys with {v}"),
            DictErr::NotAnArray(key) => write!(f, "value of {key:?} is not an array"),
        }
    }
}

impl Error for DictErr {}

/// Which part of a dict to hand over, as written in configs.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySelector {
    /// `"__all__"`: the whole dict.
    All,
    /// `"key"`: the bare value under `key`.
    Key(String),
    /// `["a", "b"]`: a sub-dict with those keys.
    Keys(Vec<String>),
    /// `{"in": "out"}`: a sub-dict with keys renamed.
    Rename(Vec<(String, String)>),
    /// `null`: an empty dict.
    Nothing,
}

impl KeySelector {
    pub fn from_value(value: &Value) -> Result<Self> {
        let unsupported = || DictErr::UnsupportedSelector(value.clone());

        match value {
            Value::Null => Ok(Self::Nothing),
            Value::String(key) if key == ALL_KEYS => Ok(Self::All),
            Value::String(key) => Ok(Self::Key(key.clone())),
            Value::Array(keys) => keys
                .iter()
                .map(|k| k.as_str().map(str::to_string).ok_or_else(unsupported))
                .collect::<Result<_>>()
                .map(Self::Keys),
            Value::Object(mapping) => mapping
                .iter()
                .map(|(k_in, k_out)| {
                    k_out
                        .as_str()
                        .map(|k_out| (k_in.clone(), k_out.to_string()))
                        .ok_or_else(unsupported)
                })
                .collect::<Result<_>>()
                .map(Self::Rename),
            _ => Err(unsupported()),
        }
    }

    /// Applies this selector to `dict`.
    pub fn select(&self, dict: &Dict) -> Result<Value> {
        let get = |key: &str| {
            dict.get(key)
                .cloned()
                .ok_or_else(|| DictErr::MissingKey(key.to_string()))
        };

        match self {
            Self::All => Ok(Value::Object(dict.clone())),
            Self::Key(key) => get(key),
            Self::Keys(keys) => keys
                .iter()
                .map(|k| Ok((k.clone(), get(k)?)))
                .collect::<Result<Dict>>()
                .map(Value::Object),
            Self::Rename(mapping) => mapping
                .iter()
                .map(|(k_in, k_out)| Ok((k_out.clone(), get(k_in)?)))
                .collect::<Result<Dict>>()
                .map(Value::Object),
            Self::Nothing => Ok(Value::Object(Dict::new())),
        }
    }
}

/// Deep-merges `rest` into a copy of `first`.
///
/// Objects present on both sides are merged recursively, anything else is
/// overwritten by the later dict.
pub fn merge_dicts<'a, I>(first: &Dict, rest: I) -> Dict
where
    I: IntoIterator<Item = &'a Dict>,
{
    let mut merged = first.clone();

    for other in rest {
        for (key, value) in other {
            if let (Some(Value::Object(dst)), Value::Object(src)) = (merged.get_mut(key), value) {
                *dst = merge_dicts(dst, [src]);
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
    }

    merged
}

/// Appends the arrays of `src` to the arrays of `dst`, key by key of `dst`.
pub fn append_dict(dst: &mut Dict, src: &Dict) -> Result<()> {
    for (key, value) in dst.iter_mut() {
        let Value::Array(items) = value else {
            return Err(DictErr::NotAnArray(key.clone()));
        };
        let extra = src
            .get(key)
            .ok_or_else(|| DictErr::MissingKey(key.clone()))?
            .as_array()
            .ok_or_else(|| DictErr::NotAnArray(key.clone()))?;

        items.extend(extra.iter().cloned());
    }

    Ok(())
}

/// Flattens nested objects, joining keys with `separator`.
pub fn flatten_dict(dict: &Dict, parent_key: &str, separator: &str) -> Dict {
    let mut flat = Dict::new();
    flatten_into(&mut flat, dict, parent_key, separator);
    flat
}

fn flatten_into(flat: &mut Dict, dict: &Dict, parent_key: &str, separator: &str) {
    for (key, value) in dict {
        let new_key = if parent_key.is_empty() {
            key.clone()
        } else {
            format!("{parent_key}{separator}{key}")
        };

        match value {
            Value::Object(nested) => flatten_into(flat, nested, &new_key, separator),
            _ => {
                flat.insert(new_key, value.clone());
            }
        }
    }
}

/// Splits a flat dict into one sub-dict per prefix.
///
/// Keys starting with a prefix land in that prefix's sub-dict with every
/// `"<prefix>_"` removed from them. Keys matching no prefix go to `extra_key`,
/// which is only present when there are such keys.
pub fn split_dict_to_subdicts(dict: &Dict, prefixes: &[&str], extra_key: &str) -> Dict {
    let mut subdicts = Dict::new();

    let extra: Dict = dict
        .iter()
        .filter(|(k, _)| prefixes.iter().all(|p| !k.starts_with(p)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !extra.is_empty() {
        subdicts.insert(extra_key.to_string(), Value::Object(extra));
    }

    for prefix in prefixes {
        let pattern = format!("{prefix}_");
        let sub: Dict = dict
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.replace(&pattern, ""), v.clone()))
            .collect();
        subdicts.insert(prefix.to_string(), Value::Object(sub));
    }

    subdicts
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn dict(value: Value) -> Dict {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn selector_kinds() {
        let batch = dict(json!({ "image": [1, 2], "mask": [0, 1], "id": 7 }));

        let all = KeySelector::from_value(&json!("__all__")).unwrap();
        assert_eq!(all.select(&batch).unwrap(), Value::Object(batch.clone()));

        let key = KeySelector::from_value(&json!("id")).unwrap();
        assert_eq!(key.select(&batch).unwrap(), json!(7));

        let keys = KeySelector::from_value(&json!(["image", "id"])).unwrap();
        assert_eq!(keys.select(&batch).unwrap(), json!({ "image": [1, 2], "id": 7 }));

        let rename = KeySelector::from_value(&json!({ "mask": "targets" })).unwrap();
        assert_eq!(rename.select(&batch).unwrap(), json!({ "targets": [0, 1] }));

        let nothing = KeySelector::from_value(&Value::Null).unwrap();
        assert_eq!(nothing.select(&batch).unwrap(), json!({}));
    }

    #[test]
    fn selector_errors() {
        assert!(matches!(
            KeySelector::from_value(&json!(3)),
            Err(DictErr::UnsupportedSelector(_))
        ));
        assert!(matches!(
            KeySelector::from_value(&json!(["a", 1])),
            Err(DictErr::UnsupportedSelector(_))
        ));

        let missing = KeySelector::Key("logits".into()).select(&Dict::new());
        assert_eq!(missing, Err(DictErr::MissingKey("logits".into())));
    }

    #[test]
    fn merge_recurses_into_nested_objects() {
        let base = dict(json!({
            "model": { "groups": ["last"], "in_features": 8 },
            "stages": { "train": { "epochs": 1 } },
            "seed": 0
        }));
        let overrides = dict(json!({
            "model": { "in_features": 16 },
            "stages": { "train": { "lr": 0.1 } },
            "seed": { "value": 42 }
        }));
        let last = dict(json!({ "model": "replaced" }));

        let merged = merge_dicts(&base, [&overrides]);
        assert_eq!(
            Value::Object(merged),
            json!({
                "model": { "groups": ["last"], "in_features": 16 },
                "stages": { "train": { "epochs": 1, "lr": 0.1 } },
                "seed": { "value": 42 }
            })
        );

        let merged = merge_dicts(&base, [&overrides, &last]);
        assert_eq!(merged["model"], json!("replaced"));
        assert_eq!(base["model"]["in_features"], json!(8));
    }

    #[test]
    fn append_concatenates_per_key() {
        let mut acc = dict(json!({ "loss": [1.0], "acc": [] }));
        let next = dict(json!({ "loss": [2.0, 3.0], "acc": [0.5], "ignored": [9] }));

        append_dict(&mut acc, &next).unwrap();
        assert_eq!(Value::Object(acc), json!({ "loss": [1.0, 2.0, 3.0], "acc": [0.5] }));
    }

    #[test]
    fn append_rejects_missing_and_scalar_values() {
        let mut acc = dict(json!({ "loss": [1.0] }));
        assert_eq!(
            append_dict(&mut acc, &Dict::new()),
            Err(DictErr::MissingKey("loss".into()))
        );

        let mut scalar = dict(json!({ "loss": 1.0 }));
        assert_eq!(
            append_dict(&mut scalar, &dict(json!({ "loss": [2.0] }))),
            Err(DictErr::NotAnArray("loss".into()))
        );
    }

    #[test]
    fn flatten_keeps_order_and_joins_keys() {
        let nested = dict(json!({
            "train": { "loss": 0.5, "metrics": { "acc": 0.9 } },
            "epoch": 3
        }));

        let flat = flatten_dict(&nested, "", "/");
        let keys: Vec<_> = flat.keys().cloned().collect();
        assert_eq!(keys, ["train/loss", "train/metrics/acc", "epoch"]);

        let prefixed = flatten_dict(&nested, "run", ".");
        assert_eq!(prefixed["run.train.metrics.acc"], json!(0.9));
    }

    #[test]
    fn split_by_prefix() {
        let flat = dict(json!({
            "optimizer_lr": 0.1,
            "optimizer_momentum": 0.9,
            "scheduler_step": 10,
            "seed": 1
        }));

        let split = split_dict_to_subdicts(&flat, &["optimizer", "scheduler"], "misc");
        assert_eq!(
            Value::Object(split),
            json!({
                "misc": { "seed": 1 },
                "optimizer": { "lr": 0.1, "momentum": 0.9 },
                "scheduler": { "step": 10 }
            })
        );

        let no_extra = split_dict_to_subdicts(&dict(json!({ "a_x": 1 })), &["a"], "misc");
        assert!(!no_extra.contains_key("misc"));
    }
}
