//! Resource definitions: per-type display metadata and alias lookup.
//!
//! A definition tells callers which namespace a type lives in by default,
//! which short names refer to it, and which spec fields are worth showing in
//! a table. The store itself never requires a type to be defined.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::identity::{Namespace, ResourceKind, ResourceType};

/// A table column rendered from a spec by a `{.a.b}` path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintColumn {
    pub name: String,
    pub json_path: String,
}

impl PrintColumn {
    pub fn new(name: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json_path: json_path.into(),
        }
    }

    /// Renders the column value, or an empty string when the path is missing.
    pub fn render(&self, spec: &Value) -> String {
        let path = self
            .json_path
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim_start_matches('.');

        let mut current = spec;
        if !path.is_empty() {
            for segment in path.split('.') {
                let next = match current {
                    Value::Object(map) => map.get(segment),
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                };
                match next {
                    Some(value) => current = value,
                    None => return String::new(),
                }
            }
        }

        match current {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Static description of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub default_namespace: Namespace,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub print_columns: Vec<PrintColumn>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<ResourceType>, default_namespace: impl Into<Namespace>) -> Self {
        Self {
            resource_type: resource_type.into(),
            default_namespace: default_namespace.into(),
            aliases: Vec::new(),
            print_columns: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, json_path: impl Into<String>) -> Self {
        self.print_columns.push(PrintColumn::new(name, json_path));
        self
    }

    /// Kind in the default namespace.
    pub fn default_kind(&self) -> ResourceKind {
        ResourceKind::new(self.default_namespace.clone(), self.resource_type.clone())
    }

    /// Renders every print column for a spec, in declaration order.
    pub fn render_row(&self, spec: &Value) -> Vec<String> {
        self.print_columns.iter().map(|c| c.render(spec)).collect()
    }
}

/// Registry of definitions, addressable by type name or alias.
#[derive(Debug, Default, Clone)]
pub struct DefinitionRegistry {
    definitions: IndexMap<ResourceType, ResourceDefinition>,
    // lowercased name or alias -> canonical type
    names: IndexMap<String, ResourceType>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition; type names and aliases must be unique
    /// (case-insensitively) across the registry.
    pub fn register(&mut self, definition: ResourceDefinition) -> Result<()> {
        definition.default_kind().validate()?;

        let mut names = vec![definition.resource_type.to_ascii_lowercase()];
        names.extend(definition.aliases.iter().map(|a| a.to_ascii_lowercase()));

        for (i, name) in names.iter().enumerate() {
            if self.names.contains_key(name) || names[..i].contains(name) {
                return Err(CoreError::duplicate_definition(name.clone()));
            }
        }

        for name in names {
            self.names.insert(name, definition.resource_type.clone());
        }
        self.definitions
            .insert(definition.resource_type.clone(), definition);
        Ok(())
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(resource_type)
    }

    /// Resolves a type name or alias, ignoring case.
    pub fn resolve(&self, name: &str) -> Option<&ResourceDefinition> {
        self.names
            .get(&name.to_ascii_lowercase())
            .and_then(|t| self.definitions.get(t))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.definitions.values()
    }
}
