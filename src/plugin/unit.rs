use std::collections::HashMap;

use serde_json::Value;

/// Name of the experiment constructor every experiment unit exports.
pub const EXPERIMENT: &str = "Experiment";
/// Name of the runner constructor every experiment unit exports.
pub const RUNNER: &str = "Runner";

/// A configured experiment.
pub trait Experiment {
    fn name(&self) -> &str;

    fn config(&self) -> &Value;

    /// The stage names of `config.stages`, in order, skipping `_`-prefixed entries.
    fn stages(&self) -> Vec<String> {
        self.config()
            .get("stages")
            .and_then(Value::as_object)
            .map(|stages| {
                stages
                    .keys()
                    .filter(|stage| !stage.starts_with('_'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Drives an experiment through its stages.
pub trait Runner {
    fn run_experiment(&mut self, experiment: &dyn Experiment) -> anyhow::Result<()>;
}

pub type ExperimentCtor = fn(Value) -> anyhow::Result<Box<dyn Experiment>>;
pub type RunnerCtor = fn() -> Box<dyn Runner>;

/// Something a plugin unit exports.
#[derive(Clone, Copy)]
pub enum Symbol {
    Experiment(ExperimentCtor),
    Runner(RunnerCtor),
}

impl Symbol {
    pub fn kind(&self) -> &'static str {
        match self {
            Symbol::Experiment(_) => "experiment constructor",
            Symbol::Runner(_) => "runner constructor",
        }
    }
}

/// A named bundle of exported symbols.
#[derive(Clone)]
pub struct PluginUnit {
    name: String,
    symbols: HashMap<String, Symbol>,
}

impl PluginUnit {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Exports `symbol` under `name`, replacing a previous export.
    pub fn export<S: Into<String>>(mut self, name: S, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    /// Exports the experiment constructor under its conventional name.
    pub fn with_experiment(self, ctor: ExperimentCtor) -> Self {
        self.export(EXPERIMENT, Symbol::Experiment(ctor))
    }

    /// Exports the runner constructor under its conventional name.
    pub fn with_runner(self, ctor: RunnerCtor) -> Self {
        self.export(RUNNER, Symbol::Runner(ctor))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, symbol: &str) -> Option<Symbol> {
        self.symbols.get(symbol).copied()
    }
}
