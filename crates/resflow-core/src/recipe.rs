use crate::error::ValidationError;
use crate::fixed::{Fixed64, Millis};
use crate::id::*;
use crate::network::{FlowNode, NodeRole};
use std::collections::HashMap;

/// A conversion recipe: consumes `inputs`, and after `duration` produces
/// `outputs`. Amounts are absolute quantities, not rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub inputs: Vec<(ResourceType, Fixed64)>,
    pub outputs: Vec<(ResourceType, Fixed64)>,
    pub duration: Millis,
}

impl Recipe {
    /// Sum of all input amounts.
    pub fn total_input(&self) -> Fixed64 {
        self.inputs
            .iter()
            .fold(Fixed64::ZERO, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

/// Builder for an immutable [`RecipeBook`]. Recipes get sequential ids in
/// registration order.
#[derive(Debug, Default)]
pub struct RecipeBookBuilder {
    recipes: Vec<Recipe>,
    name_to_id: HashMap<String, RecipeId>,
}

impl RecipeBookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe. Returns its id.
    pub fn register(
        &mut self,
        name: &str,
        inputs: Vec<(ResourceType, Fixed64)>,
        outputs: Vec<(ResourceType, Fixed64)>,
        duration: Millis,
    ) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(Recipe {
            id,
            name: name.to_string(),
            inputs,
            outputs,
            duration,
        });
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    /// Finalize. Rejects negative input or output amounts.
    pub fn build(self) -> Result<RecipeBook, RecipeBookError> {
        for recipe in &self.recipes {
            let negative = recipe
                .inputs
                .iter()
                .chain(recipe.outputs.iter())
                .any(|(_, amount)| *amount < Fixed64::ZERO);
            if negative {
                return Err(RecipeBookError::NegativeAmount(recipe.name.clone()));
            }
        }
        Ok(RecipeBook {
            recipes: self.recipes,
            name_to_id: self.name_to_id,
        })
    }
}

/// Immutable set of recipes known to the engine.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: Vec<Recipe>,
    name_to_id: HashMap<String, RecipeId>,
}

impl RecipeBook {
    pub fn get(&self, id: RecipeId) -> Option<&Recipe> {
        self.recipes.get(id.0 as usize)
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }

    /// Check that `converter` can run `recipe` right now and return the
    /// recipe. `converter` is `None` when the node id is unknown.
    pub fn accept(
        &self,
        converter_id: NodeId,
        converter: Option<&FlowNode>,
        recipe: RecipeId,
    ) -> Result<&Recipe, ValidationError> {
        let reject = |reason: &'static str| ValidationError::RecipeRejected {
            converter: converter_id,
            recipe,
            reason,
        };
        let node = converter.ok_or_else(|| reject("converter not registered"))?;
        if !node.active {
            return Err(reject("converter inactive"));
        }
        let NodeRole::Converter(spec) = &node.role else {
            return Err(reject("node is not a converter"));
        };
        if !spec.recipes.contains(&recipe) {
            return Err(reject("recipe not supported by converter"));
        }
        let def = self.get(recipe).ok_or(ValidationError::UnknownRecipe(recipe))?;
        if node.capacity < def.total_input() {
            return Err(reject("recipe input exceeds converter capacity"));
        }
        Ok(def)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeBookError {
    #[error("recipe {0} has a negative amount")]
    NegativeAmount(String),
}
