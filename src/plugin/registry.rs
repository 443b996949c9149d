use std::{collections::HashMap, path::Path};

use log::debug;

use super::{
    EXPERIMENT, ExperimentCtor, PluginErr, PluginUnit, RUNNER, Result, RunnerCtor, Symbol,
};

/// Plugin units addressable by the name of their experiment directory.
#[derive(Default)]
pub struct PluginRegistry {
    units: HashMap<String, PluginUnit>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit` under its own name.
    pub fn register(&mut self, unit: PluginUnit) -> Result<()> {
        if self.units.contains_key(unit.name()) {
            return Err(PluginErr::DuplicateUnit(unit.name().to_string()));
        }

        debug!("registered plugin unit {:?}", unit.name());
        self.units.insert(unit.name().to_string(), unit);
        Ok(())
    }

    /// Looks up the unit of an experiment directory.
    ///
    /// # Args
    /// * `expdir` - An existing directory whose last component names the unit.
    ///
    /// # Returns
    /// The registered unit or a `PluginErr`.
    pub fn import_unit(&self, expdir: &Path) -> Result<&PluginUnit> {
        if !expdir.is_dir() {
            return Err(PluginErr::NotADirectory(expdir.to_path_buf()));
        }

        let name = unit_name(expdir)?;
        self.units
            .get(&name)
            .ok_or(PluginErr::UnknownUnit(name))
    }

    /// Resolves the `Experiment` and `Runner` constructors of an experiment directory.
    pub fn import_experiment_and_runner(
        &self,
        expdir: &Path,
    ) -> Result<(ExperimentCtor, RunnerCtor)> {
        let unit = self.import_unit(expdir)?;

        let experiment = match require(unit, EXPERIMENT)? {
            Symbol::Experiment(ctor) => ctor,
            other => return Err(wrong_kind(unit, EXPERIMENT, other, "experiment constructor")),
        };
        let runner = match require(unit, RUNNER)? {
            Symbol::Runner(ctor) => ctor,
            other => return Err(wrong_kind(unit, RUNNER, other, "runner constructor")),
        };

        Ok((experiment, runner))
    }
}

fn unit_name(expdir: &Path) -> Result<String> {
    let absolute = expdir
        .canonicalize()
        .map_err(|_| PluginErr::NotADirectory(expdir.to_path_buf()))?;

    absolute
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| PluginErr::NotADirectory(expdir.to_path_buf()))
}

fn require(unit: &PluginUnit, symbol: &str) -> Result<Symbol> {
    unit.resolve(symbol).ok_or_else(|| PluginErr::MissingSymbol {
        unit: unit.name().to_string(),
        symbol: symbol.to_string(),
    })
}

fn wrong_kind(unit: &PluginUnit, symbol: &str, got: Symbol, expected: &'static str) -> PluginErr {
    debug!("{symbol:?} of {:?} is a {}", unit.name(), got.kind());
    PluginErr::WrongSymbolKind {
        unit: unit.name().to_string(),
        symbol: symbol.to_string(),
        expected,
    }
}
