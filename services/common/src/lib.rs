//! Shared types, configuration, cache and storage seams for the matching
//! engine services

pub mod config;
pub mod constants;
pub mod errors;
pub mod kv;
pub mod proto;
pub mod storage;
pub mod stream;
pub mod time;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
