//! Data-file loading for the resflow engine.
//!
//! Reads an engine configuration and a recipe file from RON, TOML, or JSON
//! and resolves resource names into the numeric types the core uses.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, EngineData, load_engine_data};
