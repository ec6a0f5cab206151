pub mod types;
pub mod error;
pub mod config;
pub mod cache;

pub use types::*;
pub use error::*;
pub use config::*;
pub use cache::*;
