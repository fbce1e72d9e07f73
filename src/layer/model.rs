//! The data model: form and property definitions.
//!
//! A `Model` is the registry the apply pipeline validates edits against:
//! which forms exist, the primary value type of each, which properties each
//! form carries, and how each property is typed, indexed, and merged.
//!
//! Universal properties (currently `.created`) are defined once and visible
//! on every form; `.created` carries the earliest-wins merge policy so
//! replayed or re-synced adds never move creation time forward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::errors::LayerError;
use super::stortype::{MergePolicy, StorType};

/// The name of the universal creation-time property.
pub const PROP_CREATED: &str = ".created";

/// One property definition within a form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropDef {
    pub name: String,
    pub stype: StorType,
    pub merge: MergePolicy,
    /// Whether values are written to the secondary index.
    pub indexed: bool,
}

impl PropDef {
    pub fn new(name: impl Into<String>, stype: StorType) -> Self {
        Self {
            name: name.into(),
            stype,
            merge: MergePolicy::Replace,
            indexed: true,
        }
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn unindexed(mut self) -> Self {
        self.indexed = false;
        self
    }
}

/// One form (node type) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDef {
    pub name: String,
    /// Type of the form's primary value, from which node identity derives.
    pub stype: StorType,
    props: HashMap<String, PropDef>,
}

impl FormDef {
    pub fn new(name: impl Into<String>, stype: StorType) -> Self {
        Self {
            name: name.into(),
            stype,
            props: HashMap::new(),
        }
    }

    pub fn with_prop(mut self, prop: PropDef) -> Self {
        self.props.insert(prop.name.clone(), prop);
        self
    }

    /// Look up a property, falling back to the universal set.
    pub fn prop(&self, name: &str) -> Result<PropDef, LayerError> {
        if let Some(def) = self.props.get(name) {
            return Ok(def.clone());
        }
        if name == PROP_CREATED {
            return Ok(created_prop());
        }
        Err(LayerError::NoSuchProp {
            form: self.name.clone(),
            prop: name.to_string(),
        })
    }

    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(|s| s.as_str())
    }
}

fn created_prop() -> PropDef {
    PropDef::new(PROP_CREATED, StorType::Time).with_merge(MergePolicy::EarliestWins)
}

/// The full model registry for a layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    forms: HashMap<String, FormDef>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_form(mut self, form: FormDef) -> Self {
        self.forms.insert(form.name.clone(), form);
        self
    }

    pub fn form(&self, name: &str) -> Result<&FormDef, LayerError> {
        self.forms.get(name).ok_or_else(|| LayerError::NoSuchForm {
            form: name.to_string(),
        })
    }

    pub fn has_form(&self, name: &str) -> bool {
        self.forms.contains_key(name)
    }

    pub fn form_names(&self) -> impl Iterator<Item = &str> {
        self.forms.keys().map(|s| s.as_str())
    }
}
