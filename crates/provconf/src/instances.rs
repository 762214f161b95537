//! provider instances
//!
//! A provider configuration has exactly one instance unless it declares `for_each`, which is
//! only valid together with `alias`. Every key of the `for_each` value then denotes one instance
//! sharing the configuration body, evaluated with `each.key`/`each.value` bound to that key.
//!
//! Resources select a configuration with a static reference and, for `for_each`
//! configurations, an instance with a (possibly dynamic) key expression:
//!
//! | reference              | configuration   | instance                           |
//! |------------------------|-----------------|------------------------------------|
//! | `aws`                  | `aws`           | the only instance                  |
//! | `aws.west`             | `aws.west`      | the only instance                  |
//! | `aws.by_region[each.key]` | `aws.by_region` | evaluated per resource instance |
//!
//! The configuration part never depends on evaluation so the dependency on a configuration's
//! instances is known before any value is.
use crate::addrs::{LocalProviderConfig, TraversalPath};
use crate::eval::{fold, ModuleValues};
use hcl::{Expression, TraversalOperator};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Reference to a provider configuration, as written in a `provider` argument
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfigRef {
    pub config: LocalProviderConfig,
    /// instance key expression, unevaluated
    pub key: Option<Expression>,
}

impl ProviderConfigRef {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self { config, key: None }
    }

    /// Decode `name`, `name.alias` or `name.alias[key]`
    pub fn parse(expression: &Expression) -> Result<Self, ProviderRefError> {
        let not_static = || ProviderRefError::NotStatic {
            found: TraversalPath::from_expression(expression)
                .map(|path| path.to_string())
                .unwrap_or_else(|| "a non-reference expression".to_string()),
        };

        let (name, operators) = match expression {
            Expression::Variable(variable) => (variable.as_str(), [].as_slice()),
            Expression::Traversal(traversal) => {
                let Expression::Variable(variable) = &traversal.expr else {
                    return Err(not_static());
                };
                (variable.as_str(), traversal.operators.as_slice())
            }
            _ => return Err(not_static()),
        };

        match operators {
            [] => Ok(Self::new(LocalProviderConfig::new(name))),
            [TraversalOperator::GetAttr(alias)] => Ok(Self::new(LocalProviderConfig::aliased(
                name,
                alias.as_str(),
            ))),
            [TraversalOperator::GetAttr(alias), TraversalOperator::Index(key)] => Ok(Self {
                config: LocalProviderConfig::aliased(name, alias.as_str()),
                key: Some(key.clone()),
            }),
            [TraversalOperator::Index(_), ..] => Err(ProviderRefError::KeyWithoutAlias {
                name: name.to_string(),
            }),
            _ => Err(not_static()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProviderRefError {
    #[error(
        "invalid provider reference {found}: expected a static reference like `name`, \
         `name.alias` or `name.alias[key]`"
    )]
    NotStatic { found: String },
    #[error(
        "invalid provider reference {name}[...]: only aliased provider configurations can \
         have instances"
    )]
    KeyWithoutAlias { name: String },
}

/// Key of one instance of a `for_each` provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `["key"]`
impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}]", self.0)
    }
}

/// A single provider instance: configuration key plus instance key for `for_each` configurations
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ProviderInstanceAddress {
    pub config_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<InstanceKey>,
}

impl ProviderInstanceAddress {
    pub fn new(config_key: impl Into<String>, key: Option<InstanceKey>) -> Self {
        Self {
            config_key: config_key.into(),
            key,
        }
    }
}

impl std::fmt::Display for ProviderInstanceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.config_key)?;
        if let Some(key) = &self.key {
            key.fmt(f)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ForEachError {
    #[error("invalid for_each argument: the given value is null")]
    Null,
    #[error(
        "invalid for_each argument: must be a map, an object, or a set of strings, found {found}"
    )]
    WrongType { found: &'static str },
    #[error("invalid for_each argument: set elements must be strings, found {found}")]
    NonStringElement { found: &'static str },
}

/// Instances of one provider configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderInstances {
    /// no `for_each`: exactly one instance without key
    Single,
    /// map or object: the instance key is the element key
    Map(IndexMap<String, hcl::Value>),
    /// set of strings: the instance key is the element itself
    Set(BTreeSet<String>),
}

impl ProviderInstances {
    /// Validate an evaluated `for_each` value
    ///
    /// Objects stand for maps and objects alike. An array of strings stands for a set, duplicate
    /// elements collapse.
    pub fn from_for_each(value: &hcl::Value) -> Result<Self, ForEachError> {
        match value {
            hcl::Value::Object(object) => Ok(Self::Map(
                object
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            )),
            hcl::Value::Array(elements) => elements
                .iter()
                .map(|element| match element {
                    hcl::Value::String(string) => Ok(string.clone()),
                    other => Err(ForEachError::NonStringElement {
                        found: value_type_name(other),
                    }),
                })
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Self::Set),
            hcl::Value::Null => Err(ForEachError::Null),
            other => Err(ForEachError::WrongType {
                found: value_type_name(other),
            }),
        }
    }

    /// Instance keys, `[None]` for a single instance configuration
    pub fn keys(&self) -> Vec<Option<InstanceKey>> {
        match self {
            ProviderInstances::Single => vec![None],
            ProviderInstances::Map(map) => {
                map.keys().map(|key| Some(InstanceKey::new(key))).collect()
            }
            ProviderInstances::Set(set) => {
                set.iter().map(|key| Some(InstanceKey::new(key))).collect()
            }
        }
    }

    pub fn contains(&self, key: Option<&InstanceKey>) -> bool {
        match (self, key) {
            (ProviderInstances::Single, None) => true,
            (ProviderInstances::Map(map), Some(key)) => map.contains_key(key.as_str()),
            (ProviderInstances::Set(set), Some(key)) => set.contains(key.as_str()),
            _ => false,
        }
    }

    /// `each.key` and `each.value` for one instance
    pub fn each(&self, key: &InstanceKey) -> Option<(hcl::Value, hcl::Value)> {
        let each_key = hcl::Value::String(key.as_str().to_string());
        match self {
            ProviderInstances::Single => None,
            ProviderInstances::Map(map) => map
                .get(key.as_str())
                .map(|value| (each_key, value.clone())),
            ProviderInstances::Set(set) => set
                .contains(key.as_str())
                .then(|| (each_key.clone(), each_key)),
        }
    }

    pub fn addresses(&self, config_key: &str) -> Vec<ProviderInstanceAddress> {
        self.keys()
            .into_iter()
            .map(|key| ProviderInstanceAddress::new(config_key, key))
            .collect()
    }
}

/// Instance keys of an evaluated `for_each` value
pub fn instance_keys(for_each: &hcl::Value) -> Result<Vec<InstanceKey>, ForEachError> {
    Ok(ProviderInstances::from_for_each(for_each)?
        .keys()
        .into_iter()
        .flatten()
        .collect())
}

fn value_type_name(value: &hcl::Value) -> &'static str {
    match value {
        hcl::Value::Null => "null",
        hcl::Value::Bool(_) => "bool",
        hcl::Value::Number(_) => "number",
        hcl::Value::String(_) => "string",
        hcl::Value::Array(_) => "tuple",
        hcl::Value::Object(_) => "object",
    }
}

/// Current instances of provider configurations, as far as their `for_each` folds to a constant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderExpansions {
    configs: IndexMap<String, ProviderInstances>,
    /// instance chosen by a pass-through, by the key of the child's entry
    selected: IndexMap<String, InstanceKey>,
    /// why instances or a selected instance are unknown
    unknown: IndexMap<String, String>,
}

impl ProviderExpansions {
    pub fn insert(&mut self, config_key: impl Into<String>, instances: ProviderInstances) {
        self.configs.insert(config_key.into(), instances);
    }

    pub fn get(&self, config_key: &str) -> Option<&ProviderInstances> {
        self.configs.get(config_key)
    }

    /// Instance a pass-through entry selected with `name.alias[key]`
    pub fn selected(&self, config_key: &str) -> Option<&InstanceKey> {
        self.selected.get(config_key)
    }

    /// Reason the instances of `config_key` could not be determined
    pub fn unknown(&self, config_key: &str) -> Option<&str> {
        self.unknown.get(config_key).map(String::as_str)
    }

    /// Fold the `for_each` of every source configuration and the key of every pass-through that
    /// selects an instance
    #[tracing::instrument(skip_all)]
    pub fn evaluate(values: &ModuleValues, configs: &crate::collector::ProviderConfigs) -> Self {
        let mut expansions = Self::default();

        for (key, descriptor) in configs.iter() {
            let for_each = descriptor.for_each.as_ref().filter(|_| descriptor.is_source());
            if let Some(for_each) = for_each {
                let instances = fold(for_each, &values.context(&descriptor.module))
                    .map_err(|err| err.to_string())
                    .and_then(|value| {
                        ProviderInstances::from_for_each(&value).map_err(|err| err.to_string())
                    });
                match instances {
                    Ok(instances) => expansions.insert(key, instances),
                    Err(err) => {
                        tracing::debug!(%key, %err, "provider instances unknown");
                        expansions.unknown.insert(key.clone(), err);
                    }
                }
            }

            if let Some(selected) = &descriptor.instance_key {
                match fold(&selected.key, &values.context(&selected.module)) {
                    Ok(hcl::Value::String(instance)) => {
                        expansions
                            .selected
                            .insert(key.clone(), InstanceKey::new(instance));
                    }
                    Ok(other) => {
                        let found = value_type_name(&other);
                        expansions
                            .unknown
                            .insert(key.clone(), format!("instance key must be a string, found {found}"));
                    }
                    Err(err) => {
                        tracing::debug!(%key, %err, "selected provider instance unknown");
                        expansions.unknown.insert(key.clone(), err.to_string());
                    }
                }
            }
        }
        expansions
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expr(src: &str) -> Expression {
        let expr: hcl_edit::expr::Expression = src.parse().unwrap();
        expr.into()
    }

    fn value(src: &str) -> hcl::Value {
        use hcl::eval::Evaluate;
        expr(src).evaluate(&hcl::eval::Context::new()).unwrap()
    }

    #[test]
    fn parse_references() {
        assert_eq!(
            ProviderConfigRef::parse(&expr("aws")).unwrap(),
            ProviderConfigRef::new(LocalProviderConfig::new("aws"))
        );
        assert_eq!(
            ProviderConfigRef::parse(&expr("aws.west")).unwrap(),
            ProviderConfigRef::new(LocalProviderConfig::aliased("aws", "west"))
        );

        let keyed = ProviderConfigRef::parse(&expr("aws.by_region[each.key]")).unwrap();
        assert_eq!(keyed.config, LocalProviderConfig::aliased("aws", "by_region"));
        assert_eq!(keyed.key, Some(expr("each.key")));
    }

    #[test]
    fn parse_rejects_dynamic_configuration() {
        assert!(matches!(
            ProviderConfigRef::parse(&expr("aws[each.key]")),
            Err(ProviderRefError::KeyWithoutAlias { .. })
        ));
        assert!(matches!(
            ProviderConfigRef::parse(&expr(r#""aws""#)),
            Err(ProviderRefError::NotStatic { .. })
        ));
        assert!(matches!(
            ProviderConfigRef::parse(&expr("aws.west.extra")),
            Err(ProviderRefError::NotStatic { .. })
        ));
    }

    #[test]
    fn default_configuration_is_one_instance() {
        let instances = ProviderInstances::Single;
        assert_eq!(
            instances.addresses("aws"),
            vec![ProviderInstanceAddress::new("aws", None)]
        );
        assert!(instances.contains(None));
        assert!(!instances.contains(Some(&InstanceKey::new("a"))));
    }

    #[test]
    fn map_keys() {
        let instances =
            ProviderInstances::from_for_each(&value(r#"{ a = {}, b = { x = 1 } }"#)).unwrap();
        let addresses: Vec<String> = instances
            .addresses("aws.by_region")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(addresses, vec![r#"aws.by_region["a"]"#, r#"aws.by_region["b"]"#]);

        let (each_key, each_value) = instances.each(&InstanceKey::new("b")).unwrap();
        assert_eq!(each_key, hcl::Value::from("b"));
        assert_eq!(each_value, value("{ x = 1 }"));
        assert!(instances.each(&InstanceKey::new("c")).is_none());
    }

    #[test]
    fn set_keys_are_elements() {
        let keys = instance_keys(&value(r#"["west", "east", "west"]"#)).unwrap();
        assert_eq!(keys, vec![InstanceKey::new("east"), InstanceKey::new("west")]);
    }

    #[test]
    fn rejected_shapes() {
        assert_eq!(
            ProviderInstances::from_for_each(&hcl::Value::Null),
            Err(ForEachError::Null)
        );
        assert_eq!(
            ProviderInstances::from_for_each(&value("3")),
            Err(ForEachError::WrongType { found: "number" })
        );
        assert_eq!(
            ProviderInstances::from_for_each(&value(r#"["a", 1]"#)),
            Err(ForEachError::NonStringElement { found: "number" })
        );
    }
}
