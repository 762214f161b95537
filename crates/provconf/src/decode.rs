//! decode hcl bodies into [Module] declarations
//!
//! Decoding only checks what is needed to build the module tree: block labels, the type of
//! meta-arguments and the static form of provider references. Everything else stays an
//! unevaluated expression.
use crate::addrs::{
    LocalProviderConfig, Provider, ProviderSourceError, ResourceAddr, ResourceMode,
};
use crate::instances::{ProviderConfigRef, ProviderRefError};
use crate::module_tree::{
    Module, ModuleCall, Output, PassedProvider, ProviderConfigBlock, Provisioner,
    RequiredProvider, Resource, Variable,
};
use hcl::{Block, Body, Expression, ObjectKey, Structure};

const PROVIDER_META_ARGUMENTS: &[&str] = &["alias", "version", "for_each"];
const RESOURCE_META_ARGUMENTS: &[&str] = &["provider", "count", "for_each", "depends_on"];
const RESOURCE_META_BLOCKS: &[&str] = &["lifecycle", "provisioner", "connection"];
const MODULE_META_ARGUMENTS: &[&str] =
    &["source", "version", "count", "for_each", "providers", "depends_on"];

/// Blocks that are valid but carry nothing this crate needs
const IGNORED_BLOCKS: &[&str] = &["locals", "moved", "import", "check", "removed"];

pub fn decode_module(body: &Body) -> Result<Module, DecodeErrors> {
    let mut decoder = Decoder::default();

    for structure in body {
        match structure {
            Structure::Attribute(attribute) => decoder
                .errors
                .log(Issue::RootAttribute(attribute.key.as_str().to_string())),
            Structure::Block(block) => decoder.block(block),
        }
    }

    if !decoder.errors.issues.is_empty() {
        return Err(decoder.errors);
    }

    Ok(decoder.module)
}

#[derive(Default)]
struct Decoder {
    module: Module,
    errors: DecodeErrors,
}

impl Decoder {
    fn block(&mut self, block: &Block) {
        match block.identifier.as_str() {
            "terraform" | "tofu" => self.settings(block),
            "provider" => self.provider(block),
            "resource" => self.resource(ResourceMode::Managed, block),
            "data" => self.resource(ResourceMode::Data, block),
            "ephemeral" => self.resource(ResourceMode::Ephemeral, block),
            "module" => self.module_call(block),
            "variable" => self.variable(block),
            "output" => self.output(block),
            ident if IGNORED_BLOCKS.contains(&ident) => {
                tracing::trace!(block = ident, "ignoring block");
            }
            ident => self.errors.log(Issue::UnknownBlockType(ident.to_string())),
        }
    }

    fn settings(&mut self, block: &Block) {
        for nested in block.body.blocks() {
            if nested.identifier.as_str() != "required_providers" {
                continue;
            }

            for attribute in nested.body.attributes() {
                let name = attribute.key.as_str();
                if let Some(required) = self.required_provider(name, &attribute.expr) {
                    if self.module.required_providers.contains_key(name) {
                        self.errors.log(Issue::Duplicate {
                            kind: "required provider",
                            name: name.to_string(),
                        });
                        continue;
                    }
                    self.module
                        .required_providers
                        .insert(name.to_string(), required);
                }
            }
        }
    }

    fn required_provider(&mut self, name: &str, expr: &Expression) -> Option<RequiredProvider> {
        let context = format!("required_providers.{name}");
        let mut required = RequiredProvider {
            name: name.to_string(),
            provider: Provider::implied(name),
            version: None,
            aliases: vec![],
        };

        let object = match expr {
            // legacy form: `name = "version"`
            Expression::String(version) => {
                required.version = Some(version.clone());
                return Some(required);
            }
            Expression::Object(object) => object,
            _ => {
                self.errors.log(Issue::InvalidArgument {
                    context,
                    name: name.to_string(),
                    expected: "an object",
                });
                return None;
            }
        };

        for (key, value) in object {
            let Some(key) = object_key_name(key) else {
                continue;
            };
            match key.as_str() {
                "source" => match value {
                    Expression::String(source) => match Provider::parse_source(source) {
                        Ok(provider) => required.provider = provider,
                        Err(source) => {
                            self.errors.log(Issue::InvalidProviderSource {
                                name: name.to_string(),
                                source,
                            });
                            return None;
                        }
                    },
                    _ => self.errors.log(Issue::InvalidArgument {
                        context: context.clone(),
                        name: key,
                        expected: "a string",
                    }),
                },
                "version" => match value {
                    Expression::String(version) => required.version = Some(version.clone()),
                    _ => self.errors.log(Issue::InvalidArgument {
                        context: context.clone(),
                        name: key,
                        expected: "a string",
                    }),
                },
                "configuration_aliases" => {
                    let Expression::Array(aliases) = value else {
                        self.errors.log(Issue::InvalidArgument {
                            context: context.clone(),
                            name: key,
                            expected: "a list of provider references",
                        });
                        continue;
                    };
                    for alias in aliases {
                        match ProviderConfigRef::parse(alias) {
                            Ok(ProviderConfigRef { config, key: None })
                                if config.alias.is_some() && config.local_name == name =>
                            {
                                required.aliases.push(config)
                            }
                            Ok(_) => self.errors.log(Issue::InvalidArgument {
                                context: context.clone(),
                                name: "configuration_aliases".to_string(),
                                expected: "references of the form name.alias",
                            }),
                            Err(source) => self.errors.log(Issue::InvalidProviderRef {
                                context: context.clone(),
                                source,
                            }),
                        }
                    }
                }
                other => tracing::debug!(attribute = other, "ignoring required_providers attribute"),
            }
        }

        Some(required)
    }

    fn provider(&mut self, block: &Block) {
        let Some([name]) = self.labels::<1>(block) else {
            return;
        };
        let context = format!("provider {name:?}");

        let block = ProviderConfigBlock {
            alias: self.string_attr(&context, &block.body, "alias"),
            version: self.string_attr(&context, &block.body, "version"),
            for_each: expr_attr(&block.body, "for_each"),
            config: without(&block.body, PROVIDER_META_ARGUMENTS, &[]),
            name,
        };

        let key = block.addr().string_compact();
        if self.module.provider_configs.contains_key(&key) {
            self.errors.log(Issue::Duplicate {
                kind: "provider configuration",
                name: key,
            });
            return;
        }
        self.module.provider_configs.insert(key, block);
    }

    fn resource(&mut self, mode: ResourceMode, block: &Block) {
        let Some([type_name, name]) = self.labels::<2>(block) else {
            return;
        };
        let addr = ResourceAddr::new(mode, type_name, name);
        let context = addr.to_string();

        let provider = match expr_attr(&block.body, "provider") {
            Some(expr) => match ProviderConfigRef::parse(&expr) {
                Ok(provider) => provider,
                Err(source) => {
                    self.errors.log(Issue::InvalidProviderRef { context, source });
                    return;
                }
            },
            None => ProviderConfigRef::new(LocalProviderConfig::new(addr.implied_provider())),
        };

        let provisioners = block
            .body
            .blocks()
            .filter(|nested| nested.identifier.as_str() == "provisioner")
            .filter_map(|nested| {
                let [type_name] = self.labels::<1>(nested)?;
                Some(Provisioner {
                    type_name,
                    config: without(&nested.body, &[], &["connection"]),
                })
            })
            .collect();

        let resource = Resource {
            provider,
            count: expr_attr(&block.body, "count"),
            for_each: expr_attr(&block.body, "for_each"),
            depends_on: self.list_attr(&context, &block.body, "depends_on"),
            provisioners,
            config: without(&block.body, RESOURCE_META_ARGUMENTS, RESOURCE_META_BLOCKS),
            addr,
        };

        if self.module.resources.contains_key(&context) {
            self.errors.log(Issue::Duplicate {
                kind: "resource",
                name: context,
            });
            return;
        }
        self.module.resources.insert(context, resource);
    }

    fn module_call(&mut self, block: &Block) {
        let Some([name]) = self.labels::<1>(block) else {
            return;
        };
        let context = format!("module {name:?}");

        let Some(source) = self.string_attr(&context, &block.body, "source") else {
            self.errors.log(Issue::MissingSource(name));
            return;
        };

        let providers = match expr_attr(&block.body, "providers") {
            Some(Expression::Object(object)) => object
                .iter()
                .filter_map(|(key, value)| self.passed_provider(&context, key, value))
                .collect(),
            Some(_) => {
                self.errors.log(Issue::InvalidArgument {
                    context: context.clone(),
                    name: "providers".to_string(),
                    expected: "an object",
                });
                vec![]
            }
            None => vec![],
        };

        let call = ModuleCall {
            source,
            version: self.string_attr(&context, &block.body, "version"),
            count: expr_attr(&block.body, "count"),
            for_each: expr_attr(&block.body, "for_each"),
            providers,
            depends_on: self.list_attr(&context, &block.body, "depends_on"),
            config: without(&block.body, MODULE_META_ARGUMENTS, &[]),
            name: name.clone(),
        };

        if self.module.module_calls.contains_key(&name) {
            self.errors.log(Issue::Duplicate {
                kind: "module call",
                name,
            });
            return;
        }
        self.module.module_calls.insert(name, call);
    }

    fn passed_provider(
        &mut self,
        context: &str,
        key: &ObjectKey,
        value: &Expression,
    ) -> Option<PassedProvider> {
        let in_child = match key {
            ObjectKey::Identifier(ident) => LocalProviderConfig::new(ident.as_str()),
            ObjectKey::Expression(Expression::String(name)) => LocalProviderConfig::new(name),
            ObjectKey::Expression(expr) => match ProviderConfigRef::parse(expr) {
                Ok(ProviderConfigRef { config, key: None }) => config,
                Ok(_) => {
                    self.errors.log(Issue::InvalidArgument {
                        context: context.to_string(),
                        name: "providers".to_string(),
                        expected: "keys naming a provider configuration without instance key",
                    });
                    return None;
                }
                Err(source) => {
                    self.errors.log(Issue::InvalidProviderRef {
                        context: context.to_string(),
                        source,
                    });
                    return None;
                }
            },
            _ => {
                self.errors.log(Issue::InvalidArgument {
                    context: context.to_string(),
                    name: "providers".to_string(),
                    expected: "keys naming a provider configuration",
                });
                return None;
            }
        };

        match ProviderConfigRef::parse(value) {
            Ok(in_parent) => Some(PassedProvider {
                in_child,
                in_parent,
            }),
            Err(source) => {
                self.errors.log(Issue::InvalidProviderRef {
                    context: context.to_string(),
                    source,
                });
                None
            }
        }
    }

    fn variable(&mut self, block: &Block) {
        let Some([name]) = self.labels::<1>(block) else {
            return;
        };
        let context = format!("variable {name:?}");

        let variable = Variable {
            type_constraint: expr_attr(&block.body, "type"),
            default: expr_attr(&block.body, "default"),
            description: self.string_attr(&context, &block.body, "description"),
            sensitive: self.bool_attr(&context, &block.body, "sensitive"),
            deprecated: self.string_attr(&context, &block.body, "deprecated"),
            name: name.clone(),
        };

        if self.module.variables.contains_key(&name) {
            self.errors.log(Issue::Duplicate {
                kind: "variable",
                name,
            });
            return;
        }
        self.module.variables.insert(name, variable);
    }

    fn output(&mut self, block: &Block) {
        let Some([name]) = self.labels::<1>(block) else {
            return;
        };
        let context = format!("output {name:?}");

        let output = Output {
            value: expr_attr(&block.body, "value"),
            description: self.string_attr(&context, &block.body, "description"),
            sensitive: self.bool_attr(&context, &block.body, "sensitive"),
            deprecated: self.string_attr(&context, &block.body, "deprecated"),
            depends_on: self.list_attr(&context, &block.body, "depends_on"),
            name: name.clone(),
        };

        if self.module.outputs.contains_key(&name) {
            self.errors.log(Issue::Duplicate {
                kind: "output",
                name,
            });
            return;
        }
        self.module.outputs.insert(name, output);
    }

    /// Exactly `N` labels or an issue
    fn labels<const N: usize>(&mut self, block: &Block) -> Option<[String; N]> {
        let labels: Vec<String> = block
            .labels
            .iter()
            .map(|label| label.as_str().to_string())
            .collect();

        match labels.try_into() {
            Ok(labels) => Some(labels),
            Err(_) => {
                self.errors.log(Issue::LabelCount {
                    block: block.identifier.as_str().to_string(),
                    expected: N,
                });
                None
            }
        }
    }

    fn string_attr(&mut self, context: &str, body: &Body, name: &str) -> Option<String> {
        match expr_attr(body, name)? {
            Expression::String(string) => Some(string),
            _ => {
                self.errors.log(Issue::InvalidArgument {
                    context: context.to_string(),
                    name: name.to_string(),
                    expected: "a literal string",
                });
                None
            }
        }
    }

    fn bool_attr(&mut self, context: &str, body: &Body, name: &str) -> bool {
        match expr_attr(body, name) {
            None => false,
            Some(Expression::Bool(value)) => value,
            Some(_) => {
                self.errors.log(Issue::InvalidArgument {
                    context: context.to_string(),
                    name: name.to_string(),
                    expected: "a literal bool",
                });
                false
            }
        }
    }

    fn list_attr(&mut self, context: &str, body: &Body, name: &str) -> Vec<Expression> {
        match expr_attr(body, name) {
            None => vec![],
            Some(Expression::Array(elements)) => elements,
            Some(_) => {
                self.errors.log(Issue::InvalidArgument {
                    context: context.to_string(),
                    name: name.to_string(),
                    expected: "a list",
                });
                vec![]
            }
        }
    }
}

fn expr_attr(body: &Body, name: &str) -> Option<Expression> {
    body.attributes()
        .find(|attribute| attribute.key.as_str() == name)
        .map(|attribute| attribute.expr.clone())
}

fn object_key_name(key: &ObjectKey) -> Option<String> {
    match key {
        ObjectKey::Identifier(ident) => Some(ident.as_str().to_string()),
        ObjectKey::Expression(Expression::String(string)) => Some(string.clone()),
        ObjectKey::Expression(Expression::Variable(variable)) => {
            Some(variable.as_str().to_string())
        }
        _ => None,
    }
}

/// Copy of `body` without the given attributes and blocks
fn without(body: &Body, attributes: &[&str], blocks: &[&str]) -> Body {
    body.iter()
        .filter(|structure| match structure {
            Structure::Attribute(attribute) => !attributes.contains(&attribute.key.as_str()),
            Structure::Block(block) => !blocks.contains(&block.identifier.as_str()),
        })
        .cloned()
        .collect()
}

#[derive(derive_new::new, Debug, Default)]
pub struct DecodeErrors {
    #[new(default)]
    issues: Vec<Issue>,
}

impl DecodeErrors {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl std::error::Error for DecodeErrors {}

impl std::fmt::Display for DecodeErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, issue) in self.issues.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            issue.fmt(f)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Issue {
    #[error("unexpected top level attribute {0:?}")]
    RootAttribute(String),
    #[error("unknown block type {0:?}")]
    UnknownBlockType(String),
    #[error("{block} block requires exactly {expected} label(s)")]
    LabelCount { block: String, expected: usize },
    #[error("duplicate {kind} {name:?}")]
    Duplicate { kind: &'static str, name: String },
    #[error("argument {name:?} of {context} must be {expected}")]
    InvalidArgument {
        context: String,
        name: String,
        expected: &'static str,
    },
    #[error("{context}: {source}")]
    InvalidProviderRef {
        context: String,
        source: ProviderRefError,
    },
    #[error("required provider {name:?}: {source}")]
    InvalidProviderSource {
        name: String,
        source: ProviderSourceError,
    },
    #[error("module {0:?} requires a source")]
    MissingSource(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(src: &str) -> Result<Module, DecodeErrors> {
        let body: Body = hcl_edit::parser::parse_body(src).expect("body must parse").into();
        decode_module(&body)
    }

    fn issues_for(src: &str) -> Vec<Issue> {
        decode(src).expect_err("must error").issues
    }

    #[test]
    fn provider_blocks() {
        let module = decode(
            r#"
            provider "aws" {
              region = "us-east-1"
            }
            provider "aws" {
              alias    = "by_region"
              for_each = { x = {}, y = {} }
              region   = each.key
            }
            "#,
        )
        .unwrap();

        let keys: Vec<&String> = module.provider_configs.keys().collect();
        assert_eq!(keys, vec!["aws", "aws.by_region"]);

        let by_region = &module.provider_configs["aws.by_region"];
        assert_eq!(by_region.alias.as_deref(), Some("by_region"));
        assert!(by_region.for_each.is_some());
        let remaining: Vec<&str> = by_region.config.attributes().map(|a| a.key.as_str()).collect();
        assert_eq!(remaining, vec!["region"]);
    }

    #[test]
    fn required_providers_with_aliases() {
        let module = decode(
            r#"
            terraform {
              required_providers {
                mycloud = {
                  source                = "acme/mycloud"
                  version               = "~> 1.0"
                  configuration_aliases = [mycloud.alternate]
                }
                legacy = ">= 2"
              }
            }
            "#,
        )
        .unwrap();

        let mycloud = &module.required_providers["mycloud"];
        assert_eq!(mycloud.provider.to_string(), "registry.opentofu.org/acme/mycloud");
        assert_eq!(mycloud.version.as_deref(), Some("~> 1.0"));
        assert_eq!(
            mycloud.aliases,
            vec![LocalProviderConfig::aliased("mycloud", "alternate")]
        );
        assert_eq!(module.required_providers["legacy"].version.as_deref(), Some(">= 2"));
    }

    #[test]
    fn resource_provider_binding() {
        let module = decode(
            r#"
            resource "aws_instance" "implied" {}
            resource "aws_instance" "west" {
              provider = aws.west
            }
            data "aws_ami" "keyed" {
              for_each = var.regions
              provider = aws.by_region[each.key]
            }
            "#,
        )
        .unwrap();

        assert_eq!(
            module.resources["aws_instance.implied"].provider.config,
            LocalProviderConfig::new("aws")
        );
        assert_eq!(
            module.resources["aws_instance.west"].provider.config,
            LocalProviderConfig::aliased("aws", "west")
        );
        let keyed = &module.resources["data.aws_ami.keyed"];
        assert!(keyed.provider.key.is_some());
        assert_eq!(keyed.config.iter().count(), 0);
    }

    #[test]
    fn module_call_providers() {
        let module = decode(
            r#"
            module "child" {
              source = "./child"
              providers = {
                aws                = aws.west
                mycloud.alternate  = mycloud.primary
              }
              instance_count = 2
            }
            "#,
        )
        .unwrap();

        let call = &module.module_calls["child"];
        assert_eq!(call.source, "./child");
        assert_eq!(call.providers.len(), 2);
        assert_eq!(call.providers[0].in_child, LocalProviderConfig::new("aws"));
        assert_eq!(
            call.providers[1].in_child,
            LocalProviderConfig::aliased("mycloud", "alternate")
        );
        assert_eq!(
            call.providers[1].in_parent.config,
            LocalProviderConfig::aliased("mycloud", "primary")
        );
        let inputs: Vec<&str> = call.config.attributes().map(|a| a.key.as_str()).collect();
        assert_eq!(inputs, vec!["instance_count"]);
    }

    #[test]
    fn root_attribute_errors() {
        assert_eq!(issues_for("root_attr = 1"), vec![Issue::RootAttribute("root_attr".into())]);
    }

    #[test]
    fn dynamic_provider_reference_errors() {
        let issues = issues_for(
            r#"
            resource "aws_instance" "x" {
              provider = var.p[0].x
            }
            "#,
        );
        assert!(matches!(
            issues[0],
            Issue::InvalidProviderRef {
                source: ProviderRefError::NotStatic { .. },
                ..
            }
        ));

        let issues = issues_for(
            r#"
            resource "aws_instance" "z" {
              provider = lookup(var.providers, "a")
            }
            "#,
        );
        assert!(matches!(
            issues[0],
            Issue::InvalidProviderRef {
                source: ProviderRefError::NotStatic { .. },
                ..
            }
        ));

        // `local` is a valid provider name, so this is a static reference
        let module = decode(
            r#"
            resource "aws_instance" "w" {
              provider = local.provider
            }
            "#,
        )
        .unwrap();
        assert_eq!(
            module.resources.values().next().unwrap().provider.config,
            LocalProviderConfig::aliased("local", "provider")
        );

        let issues = issues_for(
            r#"
            resource "aws_instance" "y" {
              provider = aws[each.key]
            }
            "#,
        );
        assert!(matches!(
            issues[0],
            Issue::InvalidProviderRef {
                source: ProviderRefError::KeyWithoutAlias { .. },
                ..
            }
        ));
    }

    #[test]
    fn duplicate_provider_configuration() {
        let issues = issues_for(
            r#"
            provider "aws" {}
            provider "aws" {}
            "#,
        );
        assert_eq!(
            issues,
            vec![Issue::Duplicate {
                kind: "provider configuration",
                name: "aws".into()
            }]
        );
    }

    #[test]
    fn label_count() {
        let issues = issues_for(r#"resource "only_type" {}"#);
        assert_eq!(
            issues,
            vec![Issue::LabelCount {
                block: "resource".into(),
                expected: 2
            }]
        );
    }

    #[test]
    fn unknown_block_type_errors() {
        assert!(issues_for("unknown_block_type {}")
            .contains(&Issue::UnknownBlockType("unknown_block_type".into())));
    }
}
