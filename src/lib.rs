#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod data;
pub mod feed;
pub mod media;
pub mod session;
pub mod storage;
pub mod upload;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
