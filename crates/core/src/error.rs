use thiserror::Error;

pub type BeaconResult<T> = Result<T, BeaconError>;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Target resolution error: {0}")]
    Resolution(String),

    #[error("Capability unavailable: {0}")]
    Unsupported(String),

    #[error("Unknown tracker instance: {0}")]
    UnknownInstance(usize),

    #[error("Plugin hook failed: {0}")]
    Hook(String),
}
