use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected model/optimizer/training configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A call-site precondition was violated (mismatched lengths, wrong input size).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `backward` was called without a preceding `forward_train`.
    #[error("{layer} layer has no cached forward pass; call forward_train before backward")]
    MissingForwardCache { layer: &'static str },

    #[error("unknown activation code {0}")]
    UnknownActivation(u32),

    /// Malformed or mismatched checkpoint / dataset content.
    #[error("invalid data: {0}")]
    Format(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
