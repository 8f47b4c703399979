//! Per-resource-type stock and rate figures, with a TTL cache over the
//! canonical store.
//!
//! Reads always hand out owned clones. Every write invalidates the cache
//! entry for the written type and nothing else.

use crate::error::ValidationError;
use crate::fixed::{Fixed64, Millis, clamp_stock, fixed64_to_f64};
use crate::id::{RecipeId, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Global figures for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: ResourceType,
    pub current: Fixed64,
    pub max: Fixed64,
    pub production_rate: Fixed64,
    pub consumption_rate: Fixed64,
    pub last_updated: Millis,
}

impl ResourceState {
    /// All-zero state for a type the store has never seen.
    pub fn empty(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            current: Fixed64::ZERO,
            max: Fixed64::ZERO,
            production_rate: Fixed64::ZERO,
            consumption_rate: Fixed64::ZERO,
            last_updated: 0,
        }
    }

    /// A state with the given stock and capacity and zero rates.
    pub fn with_stock(resource_type: ResourceType, current: Fixed64, max: Fixed64) -> Self {
        Self {
            current,
            max,
            ..Self::empty(resource_type)
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("current", self.current),
            ("max", self.max),
            ("production_rate", self.production_rate),
            ("consumption_rate", self.consumption_rate),
        ];
        for (field, value) in fields {
            if value < Fixed64::ZERO {
                return Err(ValidationError::NegativeResourceValue {
                    resource: self.resource_type,
                    field,
                    value: fixed64_to_f64(value),
                });
            }
        }
        Ok(())
    }
}

/// A cached snapshot. Valid while `now - cached_at < ttl`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub state: ResourceState,
    pub cached_at: Millis,
}

impl CacheEntry {
    pub fn is_valid(&self, now: Millis, ttl: Millis) -> bool {
        now.saturating_sub(self.cached_at) < ttl
    }
}

#[derive(Debug, Default)]
pub struct ResourceStateStore {
    canonical: HashMap<ResourceType, ResourceState>,
    cache: HashMap<ResourceType, CacheEntry>,
    ttl: Millis,
}

impl ResourceStateStore {
    pub fn new(ttl: Millis) -> Self {
        Self {
            canonical: HashMap::new(),
            cache: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Millis {
        self.ttl
    }

    /// Read a type's state. Serves a valid cache entry if there is one,
    /// otherwise refreshes the cache from the canonical store.
    pub fn get_resource_state(&mut self, resource: ResourceType, now: Millis) -> ResourceState {
        if let Some(entry) = self.cache.get(&resource)
            && entry.is_valid(now, self.ttl)
        {
            return entry.state.clone();
        }
        let state = self
            .canonical
            .get(&resource)
            .cloned()
            .unwrap_or_else(|| ResourceState::empty(resource));
        self.cache.insert(
            resource,
            CacheEntry {
                state: state.clone(),
                cached_at: now,
            },
        );
        state
    }

    /// Overwrite a type's state. Negative fields are rejected; `current`
    /// is clamped into `[0, max]`.
    pub fn set_resource_state(
        &mut self,
        resource: ResourceType,
        mut state: ResourceState,
    ) -> Result<(), ValidationError> {
        state.resource_type = resource;
        state.validate()?;
        state.current = clamp_stock(state.current, state.max);
        self.canonical.insert(resource, state);
        self.invalidate(resource);
        Ok(())
    }

    /// Drop the cached entry for one type.
    pub fn invalidate(&mut self, resource: ResourceType) {
        self.cache.remove(&resource);
    }

    /// Add `amount` to the stock of `resource`, clamped to `max`.
    pub fn record_production(
        &mut self,
        resource: ResourceType,
        amount: Fixed64,
        now: Millis,
    ) -> Result<(), ValidationError> {
        check_amount(resource, "production", amount)?;
        self.adjust(resource, now, |s| {
            s.current = clamp_stock(s.current.saturating_add(amount), s.max);
        });
        Ok(())
    }

    /// Remove `amount` from the stock of `resource`, clamped at zero.
    pub fn record_consumption(
        &mut self,
        resource: ResourceType,
        amount: Fixed64,
        now: Millis,
    ) -> Result<(), ValidationError> {
        check_amount(resource, "consumption", amount)?;
        self.adjust(resource, now, |s| {
            s.current = clamp_stock(s.current.saturating_sub(amount), s.max);
        });
        Ok(())
    }

    /// Take every input of a recipe from stock, or nothing if any input is
    /// short.
    pub(crate) fn consume_inputs(
        &mut self,
        recipe: RecipeId,
        inputs: &[(ResourceType, Fixed64)],
        now: Millis,
    ) -> Result<(), ValidationError> {
        let mut needed: HashMap<ResourceType, Fixed64> = HashMap::new();
        for &(resource, amount) in inputs {
            let total = needed.entry(resource).or_insert(Fixed64::ZERO);
            *total = total.saturating_add(amount);
        }
        for (&resource, &amount) in &needed {
            let available = self
                .canonical
                .get(&resource)
                .map(|s| clamp_stock(s.current, s.max))
                .unwrap_or(Fixed64::ZERO);
            if available < amount {
                return Err(ValidationError::InsufficientResources {
                    recipe,
                    resource,
                    needed: fixed64_to_f64(amount),
                    available: fixed64_to_f64(available),
                });
            }
        }
        for (resource, amount) in needed {
            self.adjust(resource, now, |s| {
                s.current = clamp_stock(s.current.saturating_sub(amount), s.max);
            });
        }
        Ok(())
    }

    /// Add recipe outputs to stock, each clamped to its type's `max`.
    pub(crate) fn add_outputs(&mut self, outputs: &[(ResourceType, Fixed64)], now: Millis) {
        for &(resource, amount) in outputs {
            self.adjust(resource, now, |s| {
                s.current = clamp_stock(s.current.saturating_add(amount), s.max);
            });
        }
    }

    /// Write the figures computed by an optimization pass.
    pub(crate) fn apply_pass(
        &mut self,
        resource: ResourceType,
        production: Fixed64,
        consumption: Fixed64,
        now: Millis,
    ) {
        self.adjust(resource, now, |s| {
            s.production_rate = production.max(Fixed64::ZERO);
            s.consumption_rate = consumption.max(Fixed64::ZERO);
            let next = s
                .current
                .saturating_add(production)
                .saturating_sub(consumption);
            s.current = clamp_stock(next, s.max);
        });
    }

    fn adjust(&mut self, resource: ResourceType, now: Millis, f: impl FnOnce(&mut ResourceState)) {
        let state = self
            .canonical
            .entry(resource)
            .or_insert_with(|| ResourceState::empty(resource));
        f(state);
        state.last_updated = now;
        self.invalidate(resource);
    }

    /// Whether a valid cache entry exists for `resource` at `now`.
    pub fn is_cached(&self, resource: ResourceType, now: Millis) -> bool {
        self.cache
            .get(&resource)
            .is_some_and(|e| e.is_valid(now, self.ttl))
    }

    /// Resource types with a canonical entry, sorted.
    pub fn resource_types(&self) -> Vec<ResourceType> {
        let mut types: Vec<ResourceType> = self.canonical.keys().copied().collect();
        types.sort();
        types
    }
}

fn check_amount(
    resource: ResourceType,
    field: &'static str,
    amount: Fixed64,
) -> Result<(), ValidationError> {
    if amount < Fixed64::ZERO {
        return Err(ValidationError::NegativeResourceValue {
            resource,
            field,
            value: fixed64_to_f64(amount),
        });
    }
    Ok(())
}
