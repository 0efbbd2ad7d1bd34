pub mod anchor;
pub mod audit;
pub mod config;
pub mod database;
pub mod error;

pub use error::{AnchorError, Result};
