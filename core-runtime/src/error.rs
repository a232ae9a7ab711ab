use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker '{0}' panicked")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, Error>;
