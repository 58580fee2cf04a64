pub mod api;
pub mod app;
pub mod capture;
pub mod config;
pub mod digest;
pub mod logging;
pub mod retention;
pub mod scheduler;
pub mod state;
