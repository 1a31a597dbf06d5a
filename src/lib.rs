pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod realtime;
pub mod reconciler;
pub mod ui;
