use std::{error::Error, fmt, io, process::ExitStatus};

/// The distributed module's result type.
pub type Result<T> = std::result::Result<T, LaunchErr>;

/// Launcher failures.
#[derive(Debug)]
pub enum LaunchErr {
    /// A worker process could not be started.
    Spawn { local_rank: usize, source: io::Error },
    /// A worker process exited unsuccessfully.
    WorkerFailed { local_rank: usize, status: ExitStatus },
    /// Waiting on a worker process failed.
    Wait { local_rank: usize, source: io::Error },
    /// The launcher received an interrupt while waiting on its workers.
    Interrupted,
    /// A distributed parameter could not be parsed.
    InvalidParams { var: &'static str, value: String },
    /// The device backend refused a request.
    Device { local_rank: usize, msg: String },
    /// The process group rendezvous failed.
    Rendezvous(String),
    Io(io::Error),
}

impl fmt::Display for LaunchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchErr::Spawn { local_rank, source } => {
                write!(f, "failed to spawn worker {local_rank}: {source}")
            }
            LaunchErr::WorkerFailed { local_rank, status } => {
                write!(f, "worker {local_rank} exited with {status}")
            }
            LaunchErr::Wait { local_rank, source } => {
                write!(f, "failed to wait on worker {local_rank}: {source}")
            }
            LaunchErr::Interrupted => write!(f, "interrupted while waiting on workers"),
            LaunchErr::InvalidParams { var, value } => {
                write!(f, "invalid value for {var}: {value:?}")
            }
            LaunchErr::Device { local_rank, msg } => {
                write!(f, "device error for local rank {local_rank}: {msg}")
            }
            LaunchErr::Rendezvous(msg) => write!(f, "rendezvous failed: {msg}"),
            LaunchErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LaunchErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LaunchErr::Spawn { source, .. } | LaunchErr::Wait { source, .. } => Some(source),
            LaunchErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LaunchErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<LaunchErr> for io::Error {
    fn from(value: LaunchErr) -> Self {
        match value {
            LaunchErr::Io(e) => e,
            LaunchErr::Interrupted => io::Error::new(io::ErrorKind::Interrupted, value),
            other => io::Error::other(other),
        }
    }
}
