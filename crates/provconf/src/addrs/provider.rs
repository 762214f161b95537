//! fully qualified provider types
use std::str::FromStr;

pub const DEFAULT_REGISTRY_HOST: &str = "registry.opentofu.org";
pub const DEFAULT_NAMESPACE: &str = "hashicorp";
/// Host of providers that are compiled into the engine
pub const BUILTIN_HOST: &str = "terraform.io";

/// Fully qualified provider type: `registry.opentofu.org/hashicorp/aws`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Provider {
    pub hostname: String,
    pub namespace: String,
    pub type_name: String,
}

impl Provider {
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            type_name: type_name.into(),
        }
    }

    /// Provider implied by a local name that has no `required_providers` entry
    pub fn implied(local_name: &str) -> Self {
        if local_name == "terraform" {
            return Self::new(BUILTIN_HOST, "builtin", local_name);
        }
        Self::new(DEFAULT_REGISTRY_HOST, DEFAULT_NAMESPACE, local_name)
    }

    pub fn is_builtin(&self) -> bool {
        self.hostname == BUILTIN_HOST && self.namespace == "builtin"
    }

    /// Parse a `source` string: `type`, `namespace/type` or `hostname/namespace/type`
    pub fn parse_source(given: &str) -> Result<Self, ProviderSourceError> {
        let parts: Vec<&str> = given.split('/').collect();
        let (hostname, namespace, type_name) = match parts.as_slice() {
            [type_name] => (DEFAULT_REGISTRY_HOST, DEFAULT_NAMESPACE, *type_name),
            [namespace, type_name] => (DEFAULT_REGISTRY_HOST, *namespace, *type_name),
            [hostname, namespace, type_name] => (*hostname, *namespace, *type_name),
            _ => {
                return Err(ProviderSourceError::new(
                    given,
                    "expected at most three parts separated by '/'",
                ))
            }
        };

        for part in [hostname, namespace, type_name] {
            if part.is_empty() {
                return Err(ProviderSourceError::new(given, "empty part"));
            }
        }
        for part in [namespace, type_name] {
            if !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ProviderSourceError::new(
                    given,
                    "namespace and type may only contain letters, digits, '-' and '_'",
                ));
            }
        }

        Ok(Self::new(
            hostname.to_ascii_lowercase(),
            namespace.to_ascii_lowercase(),
            type_name.to_ascii_lowercase(),
        ))
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

impl FromStr for Provider {
    type Err = ProviderSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_source(s)
    }
}

impl serde::Serialize for Provider {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Provider {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid provider source {given:?}: {reason}")]
pub struct ProviderSourceError {
    given: String,
    reason: &'static str,
}

impl ProviderSourceError {
    fn new(given: &str, reason: &'static str) -> Self {
        Self {
            given: given.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_source_forms() {
        assert_eq!(
            Provider::parse_source("aws").unwrap().to_string(),
            "registry.opentofu.org/hashicorp/aws"
        );
        assert_eq!(
            Provider::parse_source("Acme/MyCloud").unwrap().to_string(),
            "registry.opentofu.org/acme/mycloud"
        );
        assert_eq!(
            Provider::parse_source("example.com/acme/mycloud")
                .unwrap()
                .to_string(),
            "example.com/acme/mycloud"
        );
    }

    #[test]
    fn parse_source_rejects_garbage() {
        assert!(Provider::parse_source("a/b/c/d").is_err());
        assert!(Provider::parse_source("hashicorp/").is_err());
        assert!(Provider::parse_source("hashi corp/aws").is_err());
    }

    #[test]
    fn implied_builtin() {
        assert!(Provider::implied("terraform").is_builtin());
        assert_eq!(
            Provider::implied("terraform").to_string(),
            "terraform.io/builtin/terraform"
        );
        assert!(!Provider::implied("aws").is_builtin());
    }

    #[test]
    fn serde_as_string() {
        let provider = Provider::implied("aws");
        let json = serde_json::to_string(&provider).unwrap();
        assert_eq!(json, "\"registry.opentofu.org/hashicorp/aws\"");
        let back: Provider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, provider);
    }
}
