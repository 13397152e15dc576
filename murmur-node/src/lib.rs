pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod simulate;
pub mod ui;
