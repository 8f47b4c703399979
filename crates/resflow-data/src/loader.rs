//! Resolution pipeline: reads data files, resolves resource names, builds the
//! engine configuration and recipe book.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`load_engine_data`].

use resflow_core::config::EngineConfig;
use resflow_core::engine::FlowEngine;
use resflow_core::error::ValidationError;
use resflow_core::fixed::{Fixed64, f64_to_fixed64};
use resflow_core::id::{RecipeId, ResourceType};
use resflow_core::recipe::{RecipeBook, RecipeBookBuilder, RecipeBookError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::schema::{AmountData, RecipeFileData};

/// Base name of the optional engine configuration file.
pub const ENGINE_FILE: &str = "engine";
/// Base name of the required recipe file.
pub const RECIPES_FILE: &str = "recipes";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The configuration parsed but the engine cannot run with it.
    #[error("invalid configuration in {file}: {source}")]
    InvalidConfig {
        file: PathBuf,
        #[source]
        source: ValidationError,
    },

    /// A recipe parsed but was rejected by the recipe book.
    #[error("invalid recipe in {file}: {source}")]
    Recipe {
        file: PathBuf,
        #[source]
        source: RecipeBookError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Loading
// ===========================================================================

/// Everything a data directory defines for an engine.
#[derive(Debug)]
pub struct EngineData {
    pub config: EngineConfig,
    pub recipes: RecipeBook,
    /// Resource name to its numeric type.
    pub resources: HashMap<String, ResourceType>,
}

impl EngineData {
    /// Look up a resource type by name.
    pub fn resource(&self, name: &str) -> Option<ResourceType> {
        self.resources.get(name).copied()
    }

    /// Build an engine with the bundled event bus and system clock.
    pub fn into_engine(self) -> Result<FlowEngine, ValidationError> {
        let mut engine = FlowEngine::new(self.config)?;
        engine.set_recipes(self.recipes);
        Ok(engine)
    }
}

/// Load an engine configuration file and validate it.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, DataLoadError> {
    let config: EngineConfig = deserialize_file(path)?;
    config
        .validate()
        .map_err(|source| DataLoadError::InvalidConfig {
            file: path.to_path_buf(),
            source,
        })?;
    Ok(config)
}

/// Load a recipe file, resolving every resource name against the file's
/// `resources` list.
pub fn load_recipes(
    path: &Path,
) -> Result<(RecipeBook, HashMap<String, ResourceType>), DataLoadError> {
    let data: RecipeFileData = deserialize_file(path)?;

    let mut resources: HashMap<String, ResourceType> = HashMap::new();
    for (index, name) in data.resources.iter().enumerate() {
        check_duplicate(&resources, name, path)?;
        resources.insert(name.clone(), ResourceType(index as u32));
    }

    let resolve = |amounts: &[AmountData]| -> Result<Vec<(ResourceType, Fixed64)>, DataLoadError> {
        amounts
            .iter()
            .map(|a| {
                let resource = resolve_name(&resources, a.resource(), path, "resource")?;
                Ok((*resource, f64_to_fixed64(a.amount())))
            })
            .collect()
    };

    let mut builder = RecipeBookBuilder::new();
    let mut recipe_ids: HashMap<String, RecipeId> = HashMap::new();
    for recipe in &data.recipes {
        check_duplicate(&recipe_ids, &recipe.name, path)?;
        let inputs = resolve(&recipe.inputs)?;
        let outputs = resolve(&recipe.outputs)?;
        let id = builder.register(&recipe.name, inputs, outputs, recipe.duration);
        recipe_ids.insert(recipe.name.clone(), id);
    }
    let book = builder.build().map_err(|source| DataLoadError::Recipe {
        file: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        file = %path.display(),
        resources = resources.len(),
        recipes = book.len(),
        "loaded recipe file"
    );
    Ok((book, resources))
}

/// Load a data directory: `recipes.{ron,toml,json}` is required,
/// `engine.{ron,toml,json}` is optional and falls back to defaults.
pub fn load_engine_data(dir: &Path) -> Result<EngineData, DataLoadError> {
    let config = match find_data_file(dir, ENGINE_FILE)? {
        Some(path) => load_engine_config(&path)?,
        None => {
            tracing::debug!(dir = %dir.display(), "no engine file, using defaults");
            EngineConfig::default()
        }
    };
    let recipes_path = require_data_file(dir, RECIPES_FILE)?;
    let (recipes, resources) = load_recipes(&recipes_path)?;

    Ok(EngineData {
        config,
        recipes,
        resources,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
