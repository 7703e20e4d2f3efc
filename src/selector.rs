//! Runtime model selection.
//!
//! A [`ModelState`] holds the single mutable "currently selected model" value
//! for the lifetime of the client that owns it. Reads and writes go through
//! one guarded accessor; last write wins, and no ordering beyond mutual
//! exclusion is guaranteed.

use std::sync::RwLock;

use tracing::debug;

use crate::models::DEFAULT_MODEL_ID;

/// Guarded runtime model state plus the resolution chain.
///
/// Resolution order, highest priority first:
/// 1. an explicit per-call model id,
/// 2. the runtime selection (set via [`ModelState::select`]),
/// 3. the environment-supplied default captured at construction,
/// 4. the hardcoded fallback [`DEFAULT_MODEL_ID`].
///
/// Resolution never fails; whether the resolved id is known to the provider
/// is checked by the generation call, not here.
#[derive(Debug)]
pub struct ModelState {
    selected: RwLock<Option<String>>,
    env_default: Option<String>,
}

impl ModelState {
    /// Create a new state with the environment-supplied default model, if any.
    pub fn new(env_default: Option<String>) -> Self {
        Self {
            selected: RwLock::new(None),
            env_default,
        }
    }

    /// Set the current model id for subsequent calls that pass no override.
    pub fn select(&self, model_id: impl Into<String>) {
        let model_id = model_id.into();
        debug!(model_id = %model_id, "Selecting runtime model");
        *self.selected.write().expect("model state lock poisoned") = Some(model_id);
    }

    /// Get the current runtime selection, if one was made.
    pub fn current(&self) -> Option<String> {
        self.selected.read().expect("model state lock poisoned").clone()
    }

    /// Resolve the model id to use for a call.
    pub fn resolve(&self, explicit: Option<&str>) -> String {
        if let Some(model) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
            return model.to_string();
        }
        if let Some(selected) = self.current() {
            return selected;
        }
        if let Some(env_default) = &self.env_default {
            return env_default.clone();
        }
        DEFAULT_MODEL_ID.to_string()
    }
}

impl Default for ModelState {
    fn default() -> Self {
        Self::new(None)
    }
}
