pub mod app;
pub mod backend;
pub mod client;
pub mod error;
pub mod event;
pub mod forms;
pub mod models;
pub mod push;
pub mod settings;
pub mod sync;
pub mod telemetry;
pub mod text;
pub mod ui;
