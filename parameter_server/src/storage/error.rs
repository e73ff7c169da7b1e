use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The specific result type for size mismatch checks inside the storage module.
pub type Result<T> = std::result::Result<T, SizeMismatchErr>;

/// Error returned by the parameter storage whenever there is a size mismatch between
/// gradients, parameters and external buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatchErr {
    pub expected: usize,
    pub got: usize,
}

impl Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter storage error: expected a buffer of {} values, got {}",
            self.expected, self.got
        )
    }
}

impl Error for SizeMismatchErr {}

impl From<SizeMismatchErr> for io::Error {
    fn from(value: SizeMismatchErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}
