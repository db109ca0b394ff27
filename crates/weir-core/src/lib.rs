pub mod config;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod traits;

pub use config::AppConfig;
pub use error::{Result, WeirError};
pub use node::*;
