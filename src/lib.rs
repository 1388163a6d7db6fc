//! Library crate for scannerd exposing the scan-orchestration core.
pub mod commands;
pub mod daemon;
pub mod engine;
pub mod memstat;
pub mod models;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod target;
pub mod vts;
pub mod xml;
