use std::{error::Error, fmt, path::PathBuf};

/// The plugin module's result type.
pub type Result<T> = std::result::Result<T, PluginErr>;

/// Plugin lookup failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginErr {
    NotADirectory(PathBuf),
    UnknownUnit(String),
    DuplicateUnit(String),
    MissingSymbol {
        unit: String,
        symbol: String,
    },
    WrongSymbolKind {
        unit: String,
        symbol: String,
        expected: &'static str,
    },
}

impl fmt::Display for PluginErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginErr::NotADirectory(path) => {
                write!(f, "{} is not an experiment directory", path.display())
            }
            PluginErr::UnknownUnit(name) => write!(f, "no plugin unit named {name:?}"),
            PluginErr::DuplicateUnit(name) => {
                write!(f, "plugin unit {name:?} is already registered")
            }
            PluginErr::MissingSymbol { unit, symbol } => {
                write!(f, "plugin unit {unit:?} does not export {symbol:?}")
            }
            PluginErr::WrongSymbolKind {
                unit,
                symbol,
                expected,
            } => write!(
                f,
                "symbol {symbol:?} of plugin unit {unit:?} is not a {expected}"
            ),
        }
    }
}

impl Error for PluginErr {}
