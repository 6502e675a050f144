#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod bookmark;
pub mod cards;
pub mod clipboard;
pub mod config;
pub mod data;
pub mod forms;
pub mod keys;
pub mod library;
pub mod logging;
pub mod modal;
pub mod nav;
pub mod qr;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
