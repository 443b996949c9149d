//! The built-in `lama_demo` experiment: pools random sequences with a `LamaPooling`.

use anyhow::Context;
use log::info;
use ndarray::{Array3, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    dict::{Dict, merge_dicts},
    nn::{GroupSpec, LamaPooling},
    plugin::{Experiment, PluginRegistry, PluginUnit, Runner},
};

/// Name of the experiment directory the demo unit answers to.
pub const UNIT: &str = "lama_demo";

/// Registers the demo unit.
pub fn register(registry: &mut PluginRegistry) -> crate::plugin::Result<()> {
    registry.register(
        PluginUnit::new(UNIT)
            .with_experiment(LamaExperiment::boxed)
            .with_runner(LamaRunner::boxed),
    )
}

/// Settings the demo falls back to for everything `config.json` leaves out.
pub fn default_config() -> Dict {
    let mut config = Dict::new();
    config.insert("seed".into(), json!(42));
    config.insert("model".into(), json!({ "in_features": 8, "history": 16 }));
    config.insert(
        "stages".into(),
        json!({
            "warmup": { "batches": 1, "batch_size": 4 },
            "main": { "batches": 4, "batch_size": 16 },
        }),
    );

    config
}

/// Merges `overrides` over `default_config()`.
pub fn merged_config(overrides: &Dict) -> Value {
    Value::Object(merge_dicts(&default_config(), [overrides]))
}

#[derive(Debug, Deserialize)]
struct ModelSettings {
    in_features: usize,
    history: usize,
    #[serde(default)]
    groups: Option<Vec<GroupSpec>>,
}

#[derive(Debug, Deserialize)]
struct StageSettings {
    batches: usize,
    batch_size: usize,
}

struct LamaExperiment {
    config: Value,
}

impl LamaExperiment {
    fn boxed(config: Value) -> anyhow::Result<Box<dyn Experiment>> {
        // Reject bad model settings before any worker is spawned.
        model_settings(&config)?;
        Ok(Box::new(Self { config }))
    }
}

impl Experiment for LamaExperiment {
    fn name(&self) -> &str {
        UNIT
    }

    fn config(&self) -> &Value {
        &self.config
    }
}

fn model_settings(config: &Value) -> anyhow::Result<ModelSettings> {
    let model = config.get("model").context("config has no model section")?;
    ModelSettings::deserialize(model).context("invalid model section")
}

/// Pools `batches` random batches per stage and logs the mean pooled value.
#[derive(Default)]
struct LamaRunner {
    batches_done: usize,
}

impl LamaRunner {
    fn boxed() -> Box<dyn Runner> {
        Box::<Self>::default()
    }
}

impl Runner for LamaRunner {
    fn run_experiment(&mut self, experiment: &dyn Experiment) -> anyhow::Result<()> {
        let config = experiment.config();
        let model = model_settings(config)?;
        let pooling = LamaPooling::new(model.in_features, model.groups)?;

        let seed = config.get("seed").and_then(Value::as_u64).unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(seed);

        for stage in experiment.stages() {
            let settings = &config["stages"][&stage];
            let settings = StageSettings::deserialize(settings)
                .with_context(|| format!("invalid settings for stage {stage:?}"))?;

            let mut total = 0.0;
            for _ in 0..settings.batches {
                let x = Array3::from_shape_simple_fn(
                    (settings.batch_size, model.history, model.in_features),
                    || rng.random_range(-1.0f32..1.0),
                );
                let pooled = pooling.forward(x.view(), None)?;
                total += pooled.mean_axis(Axis(0)).and_then(|m| m.mean()).unwrap_or(0.0);
                self.batches_done += 1;
            }

            let mean = if settings.batches > 0 {
                total / settings.batches as f32
            } else {
                0.0
            };
            info!(
                batches = settings.batches,
                out_features = pooling.out_features();
                "stage {stage} pooled, mean {mean:.5}"
            );
        }

        info!(batches = self.batches_done; "{} finished", experiment.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn demo_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn defaults_cover_every_section() {
        let config = default_config();

        assert_eq!(config.keys().collect::<Vec<_>>(), ["seed", "model", "stages"]);
        assert!(model_settings(&Value::Object(config)).is_ok());
    }

    #[test]
    fn user_config_overrides_defaults() {
        let mut overrides = Dict::new();
        overrides.insert("model".into(), json!({"in_features": 3}));
        overrides.insert("seed".into(), json!(1));

        let config = merged_config(&overrides);
        assert_eq!(config["model"]["in_features"], 3);
        assert_eq!(config["model"]["history"], 16);
        assert_eq!(config["seed"], 1);
    }

    #[test]
    fn registered_unit_runs() {
        let root = demo_dir();
        let expdir = root.path().join(UNIT);
        fs::create_dir(&expdir).unwrap();

        let mut registry = PluginRegistry::new();
        register(&mut registry).unwrap();
        let (experiment, runner) = registry.import_experiment_and_runner(&expdir).unwrap();

        let experiment = experiment(merged_config(&Dict::new())).unwrap();
        assert_eq!(experiment.stages(), vec!["warmup", "main"]);
        runner().run_experiment(experiment.as_ref()).unwrap();
    }

    #[test]
    fn bad_model_section_is_rejected() {
        let config = json!({"model": {"in_features": "eight"}});
        assert!(LamaExperiment::boxed(config).is_err());

        let config = json!({"model": {"in_features": 4, "history": 2, "groups": ["avg", "avg"]}});
        let experiment = LamaExperiment::boxed(config).unwrap();
        assert!(LamaRunner::default().run_experiment(experiment.as_ref()).is_err());
    }
}
