//! Streams body, hand and face landmarks from a webcam to a UDP consumer.

pub mod app;
pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod types;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
