pub mod app;
pub mod config;
pub mod digest;
pub mod domain;
pub mod error;
pub mod local;
pub mod manifest;
pub mod output;
pub mod reconcile;
pub mod store;
pub mod transfer;
pub mod tui;
