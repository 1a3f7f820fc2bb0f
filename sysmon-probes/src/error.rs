use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Attach error: {0}")]
    Attach(String),

    #[error("Map error: {0}")]
    Map(String),
}

impl From<aya::maps::MapError> for ProbeError {
    fn from(err: aya::maps::MapError) -> Self {
        ProbeError::Map(err.to_string())
    }
}
