pub mod config;
pub mod error;
pub mod types;

pub use config::NichoirConfig;
pub use error::{NichoirError, Result};
pub use types::*;
