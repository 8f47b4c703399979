//! Serde data file structs for engine configuration and recipe definitions.
//!
//! These structs define the on-disk format of a recipe file. They are
//! deserialized from RON, JSON, or TOML and then resolved into engine types
//! by the loader. Engine configuration needs no separate schema: the core
//! [`resflow_core::config::EngineConfig`] is deserialized directly.

use serde::Deserialize;

// ===========================================================================
// Recipes
// ===========================================================================

/// A resource amount, supporting both short tuple form and full form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountData {
    /// Short form: `("ore", 2.0)`.
    Short(String, f64),
    /// Full form with named fields.
    Full { resource: String, amount: f64 },
}

impl AmountData {
    pub fn resource(&self) -> &str {
        match self {
            AmountData::Short(name, _) => name,
            AmountData::Full { resource, .. } => resource,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            AmountData::Short(_, amount) => *amount,
            AmountData::Full { amount, .. } => *amount,
        }
    }
}

/// A recipe definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeData {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AmountData>,
    #[serde(default)]
    pub outputs: Vec<AmountData>,
    /// Milliseconds.
    pub duration: u64,
}

/// Top level of a recipe file. `resources` names every resource type; its
/// position in the list is the numeric `ResourceType`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeFileData {
    pub resources: Vec<String>,
    #[serde(default)]
    pub recipes: Vec<RecipeData>,
}

// ===========================================================================
// Tests
// ===========================================================================
