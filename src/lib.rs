//! Library crate for scanscope: drives remote security scans and shapes their findings for display.
pub mod aggregator;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod server;
pub mod types;
