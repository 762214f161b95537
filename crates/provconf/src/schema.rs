//! provider schemas
//!
//! The model follows the `providers schema -json` document. Only what is needed to marshal
//! configuration bodies is modelled; everything else is kept in `extra` so the full response
//! survives a trip through the cache.
use crate::addrs::{Provider, ResourceMode};
use crate::schema_cache::{cached_schema, SchemaCache, SchemaFetchError, SchemaFetcher};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type Extra = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<SchemaEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub resource_schemas: IndexMap<String, SchemaEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data_source_schemas: IndexMap<String, SchemaEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub ephemeral_resource_schemas: IndexMap<String, SchemaEntry>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A versioned block schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub block: SchemaBlock,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaBlock {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, SchemaAttribute>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub block_types: IndexMap<String, NestedBlock>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SchemaBlock {
    /// Block accepting the given attribute names and no nested blocks
    pub fn with_attributes<S: Into<String>>(names: impl IntoIterator<Item = (S, bool)>) -> Self {
        Self {
            attributes: names
                .into_iter()
                .map(|(name, required)| {
                    let attribute = SchemaAttribute {
                        required,
                        optional: !required,
                        ..Default::default()
                    };
                    (name.into(), attribute)
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    /// cty type in its JSON form, `["list", ["object", {...}]]`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_type: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SchemaAttribute {
    /// Whether the attribute is a list or set of objects
    ///
    /// Legacy providers declare some nested blocks this way, configurations then write the
    /// attribute with block syntax.
    pub fn is_object_collection(&self) -> bool {
        let Some(serde_json::Value::Array(parts)) = &self.type_ else {
            return false;
        };
        match parts.as_slice() {
            [serde_json::Value::String(kind), element] if kind == "list" || kind == "set" => {
                matches!(element, serde_json::Value::Array(inner)
                    if inner.first().and_then(|k| k.as_str()) == Some("object"))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestingMode {
    Single,
    Group,
    List,
    Set,
    Map,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub nesting_mode: NestingMode,
    #[serde(default)]
    pub block: SchemaBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A `providers schema -json` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    #[serde(default)]
    pub provider_schemas: IndexMap<Provider, ProviderSchema>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SchemaDocument {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl SchemaFetcher for SchemaDocument {
    fn fetch_schema(&self, provider: &Provider) -> Result<ProviderSchema, SchemaFetchError> {
        self.provider_schemas
            .get(provider)
            .cloned()
            .ok_or_else(|| SchemaFetchError::NotAvailable(provider.clone()))
    }
}

/// Schemas needed for one configuration load
///
/// Holds the providers of a module tree, looked up through the [SchemaCache].
#[derive(Debug, Clone, Default)]
pub struct Schemas {
    providers: HashMap<Provider, Arc<ProviderSchema>>,
    provisioners: HashMap<String, SchemaBlock>,
}

impl Schemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get every provider from the cache, fetching the ones that are missing
    ///
    /// Builtin providers have no fetchable schema and are skipped. Providers whose schema is
    /// unavailable are left out, resources using them fail to marshal.
    pub fn load(
        cache: &SchemaCache,
        fetcher: &dyn SchemaFetcher,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Self {
        let mut schemas = Self::new();
        for provider in providers {
            if provider.is_builtin() || schemas.providers.contains_key(&provider) {
                continue;
            }
            match cached_schema(cache, fetcher, &provider) {
                Ok(schema) => {
                    schemas.providers.insert(provider, schema);
                }
                Err(err) => tracing::warn!(%provider, %err, "provider schema not loaded"),
            }
        }
        schemas
    }

    pub fn insert_provider(&mut self, provider: Provider, schema: impl Into<Arc<ProviderSchema>>) {
        self.providers.insert(provider, schema.into());
    }

    pub fn insert_provisioner(&mut self, type_name: impl Into<String>, schema: SchemaBlock) {
        self.provisioners.insert(type_name.into(), schema);
    }

    pub fn provider_config(&self, provider: &Provider) -> Option<&SchemaBlock> {
        let entry = self.providers.get(provider)?.provider.as_ref()?;
        Some(&entry.block)
    }

    /// Schema and schema version of a resource type
    pub fn resource_type_config(
        &self,
        provider: &Provider,
        mode: ResourceMode,
        type_name: &str,
    ) -> Option<(&SchemaBlock, u64)> {
        let schema = self.providers.get(provider)?;
        let entries = match mode {
            ResourceMode::Managed => &schema.resource_schemas,
            ResourceMode::Data => &schema.data_source_schemas,
            ResourceMode::Ephemeral => &schema.ephemeral_resource_schemas,
        };
        entries
            .get(type_name)
            .map(|entry| (&entry.block, entry.version))
    }

    pub fn provisioner_config(&self, type_name: &str) -> Option<&SchemaBlock> {
        self.provisioners.get(type_name)
    }
}
