pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::{CookieLifetime, FormAnalysisConfig, TrackerConfig};
pub use error::{BeaconError, BeaconResult};
