pub mod adapters;
pub mod cache;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod parsing;
pub mod persistence;
pub mod registry;
pub mod settings;
pub mod sqlite;
