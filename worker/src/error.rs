use std::{error::Error, fmt, io, path::PathBuf};

use corpus::CorpusErr;
use ndarray::ShapeError;
use rand_distr::uniform::Error as UniformError;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Corpus(CorpusErr),
    Json(serde_json::Error),
    Shape(ShapeError),
    Init(UniformError),
    /// A parameter server replied with something the protocol doesn't allow here.
    UnexpectedMessage {
        step: u64,
        got: &'static str,
    },
    /// A parameter server reported an error and dropped the connection.
    Server {
        server_id: usize,
        detail: String,
    },
    ParamsLengthMismatch {
        got: usize,
        expected: usize,
    },
    GradientLengthMismatch {
        got: usize,
        expected: usize,
    },
    /// A checkpoint exists but can't be restored.
    Checkpoint {
        path: PathBuf,
        detail: String,
    },
    /// No checkpoint is available where one is required.
    NoCheckpoint(PathBuf),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Corpus(e) => write!(f, "corpus error: {e}"),
            WorkerErr::Json(e) => write!(f, "json error: {e}"),
            WorkerErr::Shape(e) => write!(f, "parameter layout error: {e}"),
            WorkerErr::Init(e) => write!(f, "parameter initialization error: {e}"),
            WorkerErr::UnexpectedMessage { step, got } => {
                write!(f, "unexpected message at step {step}: got {got}")
            }
            WorkerErr::Server { server_id, detail } => {
                write!(f, "parameter server {server_id} failed: {detail}")
            }
            WorkerErr::ParamsLengthMismatch { got, expected } => {
                write!(f, "params length mismatch: got {got}, expected {expected}")
            }
            WorkerErr::GradientLengthMismatch { got, expected } => {
                write!(f, "gradient length mismatch: got {got}, expected {expected}")
            }
            WorkerErr::Checkpoint { path, detail } => {
                write!(f, "invalid checkpoint {}: {detail}", path.display())
            }
            WorkerErr::NoCheckpoint(dir) => {
                write!(f, "no checkpoint found in {}", dir.display())
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Corpus(e) => Some(e),
            WorkerErr::Json(e) => Some(e),
            WorkerErr::Shape(e) => Some(e),
            WorkerErr::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CorpusErr> for WorkerErr {
    fn from(value: CorpusErr) -> Self {
        Self::Corpus(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ShapeError> for WorkerErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<UniformError> for WorkerErr {
    fn from(value: UniformError) -> Self {
        Self::Init(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
