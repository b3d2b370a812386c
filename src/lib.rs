pub mod config;
pub mod document;
pub mod firestore;
pub mod metrics;
pub mod path;
pub mod revert;
pub mod store;
pub mod telemetry;
