pub mod app;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod ena;
pub mod error;
pub mod fs_util;
pub mod history;
pub mod miner;
pub mod output;
pub mod plot;
pub mod tui;
pub mod writer;
