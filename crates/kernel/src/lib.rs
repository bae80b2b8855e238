//! Vellum CMS Kernel Library
//!
//! Collections, fields, queries, hooks, auth and jobs. The main entry point
//! for running the server is the `vellum` binary.

pub mod auth;
pub mod cache;
pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod field;
pub mod hook;
pub mod input;
pub mod jobs;
pub mod plugin;
pub mod query;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;

pub use config::Config;
pub use state::{AppState, AppStateBuilder};
