//! Fencelock command-line driver
//!
//! Configuration loading, logging setup, strategy construction and the
//! `acquire` / `contend` commands behind the `fencelock` binary.

pub mod commands;
pub mod logging;
pub mod settings;
pub mod strategy;

pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use settings::Settings;
pub use strategy::ActiveStrategy;
