pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod experiment_log;
pub mod grid;
pub mod monitoring;
pub mod path_manager;
pub mod state;

pub use state::AppState;
