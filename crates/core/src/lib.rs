pub mod config;
pub mod dashboard;
pub mod error;
pub mod paths;

pub use config::{BrowserSettings, CaptureConfig, ConfigOverrides, Protocol};
pub use dashboard::dashboard_url;
pub use error::{Error, Result};
pub use paths::Paths;
