pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod state;
pub mod terminal;
pub mod tokens;
pub mod tools;
pub mod types;
pub mod ui;
pub mod util;
