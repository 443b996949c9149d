use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire nn module.
pub type Result<T> = std::result::Result<T, NnErr>;

/// The nn module's error type.
#[derive(Debug)]
pub enum NnErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyHistory,
    MaskShape {
        mask: Vec<usize>,
        input: Vec<usize>,
    },
    KernelShape {
        kernel_size: usize,
        padding: usize,
    },
    UnknownPooling(String),
    DuplicateGroup(String),
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    Shape(ShapeError),
}

impl Display for NnErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NnErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} has size {got}, expected {expected}"),
            NnErr::EmptyHistory => write!(f, "cannot pool over an empty history"),
            NnErr::MaskShape { mask, input } => {
                write!(f, "mask of shape {mask:?} does not broadcast to {input:?}")
            }
            NnErr::KernelShape {
                kernel_size,
                padding,
            } => write!(
                f,
                "kernel size {kernel_size} with padding {padding} changes the history length"
            ),
            NnErr::UnknownPooling(key) => write!(f, "unknown pooling {key:?}"),
            NnErr::DuplicateGroup(key) => write!(f, "pooling group {key:?} given twice"),
            NnErr::IndexOutOfRange { index, len } => {
                write!(f, "index {index} is out of range for {len} element(s)")
            }
            NnErr::Shape(e) => write!(f, "shape error: {e}"),
        }
    }
}

impl Error for NnErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NnErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for NnErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
