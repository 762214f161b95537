//! JSON view of a module tree, as shown by `show -json` for configurations
//!
//! [marshal] exports the whole tree with expressions marshalled against the provider schemas.
//! [marshal_single_module] exports only the root module and leaves out everything that would
//! need schemas or child modules.
mod expression;
mod type_constraint;

pub use expression::{marshal_expression, marshal_expressions, ExpressionTree, Expressions, JsonExpression};
pub use type_constraint::{ObjectAttribute, TypeConstraint};

use crate::addrs::ResourceMode;
use crate::collector::{self, collect, Mode, ModuleResources, ResourceDescriptor};
use crate::module_tree::{self, ModuleNode, ModuleTree};
use crate::resolver::normalize_resource_keys;
use crate::schema::{SchemaBlock, Schemas};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("no schema found for {address} (in provider {provider})")]
    NoSchema { address: String, provider: String },
    #[error("resource {address} has an unsupported mode {mode}")]
    UnsupportedMode { address: String, mode: ResourceMode },
    #[error("variable {variable:?} has an invalid type constraint: {reason}")]
    InvalidTypeConstraint { variable: String, reason: String },
    #[error("variable {variable:?} has an invalid default: {message}")]
    InvalidDefault { variable: String, message: String },
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// keyed by opaque provider key
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_config: BTreeMap<String, ProviderConfig>,
    pub root_module: Module,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub module_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Module {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
    /// managed resources, then data resources, each sorted by address
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub module_calls: BTreeMap<String, ModuleCall>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Variable>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Resource {
    /// relative to the containing module
    pub address: String,
    pub mode: ResourceMode,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub provider_config_key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provisioners: Vec<Provisioner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_expression: Option<JsonExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_each_expression: Option<JsonExpression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Provisioner {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Output {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<JsonExpression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ModuleCall {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_expression: Option<JsonExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_each_expression: Option<JsonExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<Box<Module>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Variable {
    /// type in its JSON form, absent for `any`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<serde_json::Value>,
    /// `Some(Value::Null)` for `default = null`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

/// Export the whole tree
#[tracing::instrument(skip_all)]
pub fn marshal(tree: &ModuleTree, schemas: &Schemas) -> Result<Config, MarshalError> {
    marshal_with_mode(tree, Mode::Full(schemas))
}

/// Export the root module on its own, without schemas
#[tracing::instrument(skip_all)]
pub fn marshal_single_module(tree: &ModuleTree) -> Result<Config, MarshalError> {
    marshal_with_mode(&tree.single_module(), Mode::SingleModule)
}

fn marshal_with_mode(tree: &ModuleTree, mode: Mode) -> Result<Config, MarshalError> {
    let mut collection = collect(tree, mode);
    normalize_resource_keys(&mut collection.resources, &collection.configs);

    let root_module = marshal_module(tree, tree.root(), Some(&collection.resources), mode)?;

    let provider_config = collection
        .configs
        .sources()
        .map(|(key, descriptor)| {
            let expressions = match (&descriptor.config, &descriptor.schema) {
                (Some(config), Some(schema)) => Some(marshal_expressions(config, schema)),
                _ => None,
            };
            let config = ProviderConfig {
                name: descriptor.name.clone(),
                full_name: descriptor.provider.to_string(),
                alias: descriptor.alias.clone(),
                version_constraint: descriptor.version_constraint.clone(),
                module_address: descriptor.module.to_string(),
                expressions: expressions.filter(|e| !e.is_empty()),
            };
            (key.clone(), config)
        })
        .collect();

    Ok(Config {
        provider_config,
        root_module,
    })
}

fn marshal_module(
    tree: &ModuleTree,
    node: &ModuleNode,
    resources: Option<&ModuleResources>,
    mode: Mode,
) -> Result<Module, MarshalError> {
    let _span = tracing::debug_span!("marshal_module", path=%node.path).entered();
    let module = &node.module;

    let descriptors: Vec<ResourceDescriptor> = match resources {
        Some(resources) => resources.resources.clone(),
        None => module
            .resources
            .values()
            .map(|resource| ResourceDescriptor::new(&node.path, module, resource))
            .collect(),
    };

    let mut managed = vec![];
    let mut data = vec![];
    for (resource, descriptor) in module.resources.values().zip(&descriptors) {
        let marshalled = marshal_resource(resource, descriptor, mode)?;
        match resource.addr.mode {
            ResourceMode::Managed => managed.push(marshalled),
            _ => data.push(marshalled),
        }
    }
    managed.sort_by(|a, b| a.address.cmp(&b.address));
    data.sort_by(|a, b| a.address.cmp(&b.address));
    managed.extend(data);

    let outputs = module
        .outputs
        .values()
        .map(|output| {
            let marshalled = Output {
                sensitive: output.sensitive,
                deprecated: output.deprecated.clone(),
                expression: (!mode.is_single_module())
                    .then(|| marshal_expression(output.value.as_ref())),
                depends_on: collector::dependencies(&output.depends_on),
                description: output.description.clone().filter(|d| !d.is_empty()),
            };
            (output.name.clone(), marshalled)
        })
        .collect();

    let mut module_calls = BTreeMap::new();
    for (call_name, call) in &module.module_calls {
        let child = tree.child(node, call_name);
        let child_resources = resources.and_then(|r| r.children.get(call_name));
        module_calls.insert(
            call_name.clone(),
            marshal_module_call(tree, call, child, child_resources, mode)?,
        );
    }

    let mut variables = BTreeMap::new();
    for variable in module.variables.values() {
        variables.insert(variable.name.clone(), marshal_variable(variable)?);
    }

    Ok(Module {
        outputs,
        resources: managed,
        module_calls,
        variables,
    })
}

fn marshal_resource(
    resource: &module_tree::Resource,
    descriptor: &ResourceDescriptor,
    mode: Mode,
) -> Result<Resource, MarshalError> {
    let address = resource.addr.to_string();
    if resource.addr.mode == ResourceMode::Ephemeral {
        return Err(MarshalError::UnsupportedMode {
            address,
            mode: resource.addr.mode,
        });
    }

    let mut marshalled = Resource {
        address,
        mode: resource.addr.mode,
        type_name: resource.addr.type_name.clone(),
        name: resource.addr.name.clone(),
        provider_config_key: descriptor.provider_config_key.clone(),
        provisioners: vec![],
        expressions: None,
        schema_version: None,
        count_expression: None,
        for_each_expression: None,
        depends_on: descriptor.depends_on.clone(),
    };

    if let Some(schemas) = mode.schemas() {
        (marshalled.count_expression, marshalled.for_each_expression) =
            repetition(resource.count.as_ref(), resource.for_each.as_ref());

        let Some((schema, version)) =
            schemas.resource_type_config(&descriptor.provider, resource.addr.mode, &resource.addr.type_name)
        else {
            return Err(MarshalError::NoSchema {
                address: marshalled.address,
                provider: descriptor.provider.to_string(),
            });
        };
        marshalled.schema_version = Some(version);
        marshalled.expressions = Some(marshal_expressions(&resource.config, schema)).filter(|e| !e.is_empty());
    }

    marshalled.provisioners = resource
        .provisioners
        .iter()
        .map(|provisioner| Provisioner {
            type_name: provisioner.type_name.clone(),
            expressions: mode
                .schemas()
                .and_then(|schemas| schemas.provisioner_config(&provisioner.type_name))
                .map(|schema| marshal_expressions(&provisioner.config, schema))
                .filter(|e| !e.is_empty()),
        })
        .collect();

    Ok(marshalled)
}

/// `count` wins over `for_each`, only one of them is ever set
fn repetition(
    count: Option<&hcl::Expression>,
    for_each: Option<&hcl::Expression>,
) -> (Option<JsonExpression>, Option<JsonExpression>) {
    match marshal_expression(count).non_empty() {
        Some(count) => (Some(count), None),
        None => (None, marshal_expression(for_each).non_empty()),
    }
}

fn marshal_module_call(
    tree: &ModuleTree,
    call: &module_tree::ModuleCall,
    child: Option<&ModuleNode>,
    child_resources: Option<&ModuleResources>,
    mode: Mode,
) -> Result<ModuleCall, MarshalError> {
    let mut marshalled = ModuleCall {
        source: call.source.clone(),
        version_constraint: call.version.clone().filter(|v| !v.is_empty()),
        depends_on: collector::dependencies(&call.depends_on),
        ..Default::default()
    };

    if mode.is_single_module() {
        return Ok(marshalled);
    }

    (marshalled.count_expression, marshalled.for_each_expression) =
        repetition(call.count.as_ref(), call.for_each.as_ref());

    let schema = match child {
        Some(child) => SchemaBlock::with_attributes(
            child
                .module
                .variables
                .values()
                .map(|variable| (variable.name.as_str(), variable.default.is_none())),
        ),
        None => {
            tracing::debug!(source=%call.source, "child module not loaded, marshalling every argument");
            SchemaBlock::with_attributes(
                call.config
                    .attributes()
                    .map(|attribute| (attribute.key.as_str(), false)),
            )
        }
    };
    marshalled.expressions = Some(marshal_expressions(&call.config, &schema)).filter(|e| !e.is_empty());

    if let Some(child) = child {
        let module = marshal_module(tree, child, child_resources, mode)?;
        marshalled.module = Some(Box::new(module));
    }

    Ok(marshalled)
}

fn marshal_variable(variable: &module_tree::Variable) -> Result<Variable, MarshalError> {
    use hcl::eval::Evaluate;

    let type_ = match &variable.type_constraint {
        Some(expression) => TypeConstraint::parse(expression)
            .map_err(|reason| MarshalError::InvalidTypeConstraint {
                variable: variable.name.clone(),
                reason,
            })?
            .to_json(),
        None => None,
    };

    let default = match &variable.default {
        Some(expression) => {
            let invalid = |message: String| MarshalError::InvalidDefault {
                variable: variable.name.clone(),
                message,
            };
            let value = expression
                .evaluate(&hcl::eval::Context::new())
                .map_err(|err| invalid(err.to_string()))?;
            Some(serde_json::to_value(&value).map_err(|err| invalid(err.to_string()))?)
        }
        None => None,
    };

    Ok(Variable {
        type_,
        required: default.is_none(),
        default,
        description: variable.description.clone().filter(|d| !d.is_empty()),
        sensitive: variable.sensitive,
        deprecated: variable.deprecated.clone(),
    })
}
