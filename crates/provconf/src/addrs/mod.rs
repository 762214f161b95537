//! addresses of modules, provider configurations and resources
//!
//! All addresses are relative to the module they are declared in unless noted otherwise. The
//! only globally unique address is the opaque provider key ([opaque_provider_key]).
mod provider;
mod reference;

pub use provider::{Provider, ProviderSourceError, BUILTIN_HOST, DEFAULT_NAMESPACE, DEFAULT_REGISTRY_HOST};
pub use reference::{IndexKey, Reference, ReferenceError, Step, Subject, TraversalPath};

/// Path of a module as the ordered list of module call names starting at the root
///
/// The root module has an empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, call_name: impl Into<String>) -> Self {
        let mut calls = self.0.clone();
        calls.push(call_name.into());
        Self(calls)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    pub fn calls(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ModulePath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// `module.a.module.b`, or the empty string for the root module
impl std::fmt::Display for ModulePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, call) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "module.{call}")?;
        }
        Ok(())
    }
}

/// A provider configuration as named inside a single module: `aws` or `aws.west`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalProviderConfig {
    pub local_name: String,
    pub alias: Option<String>,
}

impl LocalProviderConfig {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            alias: None,
        }
    }

    pub fn aliased(local_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn is_default(&self) -> bool {
        self.alias.is_none()
    }

    /// `name` or `name.alias`
    pub fn string_compact(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}.{}", self.local_name, alias),
            None => self.local_name.clone(),
        }
    }
}

impl std::fmt::Display for LocalProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.string_compact())
    }
}

/// Globally unique key of a provider configuration
///
/// The local name (alias included) in the root module, `<module path>:<local name>` elsewhere.
pub fn opaque_provider_key(local_name: &str, module: &ModulePath) -> String {
    if module.is_root() {
        local_name.to_string()
    } else {
        format!("{module}:{local_name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    Managed,
    Data,
    Ephemeral,
}

impl ResourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceMode::Managed => "managed",
            ResourceMode::Data => "data",
            ResourceMode::Ephemeral => "ephemeral",
        }
    }
}

impl std::fmt::Display for ResourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a resource relative to its module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddr {
    pub mode: ResourceMode,
    pub type_name: String,
    pub name: String,
}

impl ResourceAddr {
    pub fn new(mode: ResourceMode, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Local provider name implied by the resource type: everything before the first `_`
    pub fn implied_provider(&self) -> &str {
        self.type_name
            .split_once('_')
            .map(|(prefix, _)| prefix)
            .unwrap_or(&self.type_name)
    }
}

impl std::fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            ResourceMode::Managed => write!(f, "{}.{}", self.type_name, self.name),
            ResourceMode::Data => write!(f, "data.{}.{}", self.type_name, self.name),
            ResourceMode::Ephemeral => write!(f, "ephemeral.{}.{}", self.type_name, self.name),
        }
    }
}
