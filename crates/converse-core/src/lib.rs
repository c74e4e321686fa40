pub mod config;
pub mod error;
pub mod types;

pub use config::ConverseConfig;
pub use error::{ConverseError, Result};
pub use types::*;
