use thiserror::Error;

/// Every failure surfaced by the models, the persistence layer and the handle layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Input or label dimensions disagree with the model or with each other.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Non-positive sizes, out-of-range proportions, iteration counts or learning rates.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Singular system in a closed-form fit, or NaN/Inf during training.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// The file was readable but does not describe a valid model.
    #[error("corrupt model file: {0}")]
    CorruptModel(String),
    #[error("model handle has already been released")]
    UseAfterRelease,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fieldless view of [`Error`], stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ShapeMismatch,
    InvalidConfig,
    NumericalFailure,
    IoFailure,
    UseAfterRelease,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::NumericalFailure(_) => ErrorKind::NumericalFailure,
            Error::Io(_) | Error::CorruptModel(_) => ErrorKind::IoFailure,
            Error::UseAfterRelease => ErrorKind::UseAfterRelease,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_files_and_missing_files_share_a_kind() {
        let missing = Error::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        let corrupt = Error::CorruptModel("bad magic".to_owned());
        assert_eq!(missing.kind(), ErrorKind::IoFailure);
        assert_eq!(corrupt.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn display_includes_context() {
        let err = Error::ShapeMismatch("x has 3 columns, model expects 2".to_owned());
        assert_eq!(
            err.to_string(),
            "shape mismatch: x has 3 columns, model expects 2"
        );
    }
}
