// chatpass-core/src/lib.rs

pub mod commands;
pub mod config;
pub mod services;
pub mod types;
pub mod utils;

pub use commands::{Commands, ensure_initialized_once};
pub use types::{Grant, ResetPolicy, Uses};
