//! provider binding rules
//!
//! The static rules only need the module tree and the collected configurations. The prior state
//! rule also needs the current instances of every `for_each` configuration
//! ([ProviderExpansions]); instances that are unknown are reported as warnings.
use crate::addrs::opaque_provider_key;
use crate::collector::{Collection, ProviderConfigs, ResourceDescriptor};
use crate::diagnostics::{module_display, Diagnostics, Issue};
use crate::instances::{ProviderExpansions, ProviderInstanceAddress};
use crate::module_tree::ModuleTree;
use hcl::Expression;

/// A resource instance recorded in prior state, with the provider instance that manages it
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriorResourceInstance {
    /// absolute resource instance address
    pub address: String,
    pub provider: ProviderInstanceAddress,
}

#[tracing::instrument(skip_all)]
pub fn validate(tree: &ModuleTree, collection: &Collection) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    let configs = &collection.configs;

    for node in tree.iter() {
        for block in node.module.provider_configs.values() {
            if block.for_each.is_some() && block.alias.is_none() {
                diagnostics.log(Issue::ForEachWithoutAlias {
                    module: module_display(&node.path),
                    name: block.name.clone(),
                });
            }
        }

        for (call_name, call) in &node.module.module_calls {
            let subject = node.path.child(call_name).to_string();
            for passed in &call.providers {
                let key = opaque_provider_key(&passed.in_parent.config.string_compact(), &node.path);
                check_binding(
                    &mut diagnostics,
                    configs,
                    &subject,
                    &key,
                    passed.in_parent.key.as_ref(),
                    None,
                );
            }
        }
    }

    for resource in collection.resources.iter() {
        check_binding(
            &mut diagnostics,
            configs,
            &resource.absolute_address(),
            &resource.config_key,
            resource.instance_key.as_ref(),
            Some(resource),
        );
    }

    diagnostics
}

/// Check one reference to the configuration `key`, made by `subject`
fn check_binding(
    diagnostics: &mut Diagnostics,
    configs: &ProviderConfigs,
    subject: &str,
    key: &str,
    instance_key: Option<&Expression>,
    resource: Option<&ResourceDescriptor>,
) {
    let (Some(bound), Some(source)) = (configs.get(key), configs.source_of(key)) else {
        tracing::debug!(%subject, %key, "provider configuration not collected, skipping checks");
        return;
    };

    // a pass-through that selected an instance behaves like a single instance configuration
    let expanded = bound.instance_key.is_none() && source.for_each.is_some();

    match (expanded, instance_key) {
        (true, None) => diagnostics.log(Issue::MissingInstanceKey {
            subject: subject.to_string(),
            provider: source.key.clone(),
        }),
        (false, Some(_)) => diagnostics.log(Issue::UnexpectedInstanceKey {
            subject: subject.to_string(),
            provider: source.key.clone(),
        }),
        (true, Some(_)) => {
            let (Some(resource), Some(provider_for_each)) = (resource, &source.for_each) else {
                return;
            };
            if resource.module != source.module {
                return;
            }
            let repetition = resource.for_each.as_ref().or(resource.count.as_ref());
            if repetition == Some(provider_for_each) {
                diagnostics.log(Issue::ForEachCollision {
                    resource: subject.to_string(),
                    provider: source.key.clone(),
                });
            }
        }
        (false, None) => {}
    }
}

/// Check that every provider instance used by prior state still exists
///
/// `config_key` of a prior instance may be any key of the configuration map. Entries of modules
/// that were passed `name.alias[key]` stand for the selected instance, so they need no key.
#[tracing::instrument(skip_all)]
pub fn validate_prior_state(
    configs: &ProviderConfigs,
    expansions: &ProviderExpansions,
    prior: &[PriorResourceInstance],
) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();

    for instance in prior {
        let config_key = &instance.provider.config_key;
        let Some(source) = configs.source_of(config_key) else {
            diagnostics.log(Issue::ProviderConfigNotPresent {
                resource: instance.address.clone(),
                provider: config_key.clone(),
            });
            continue;
        };

        let unknown = |reason: Option<&str>| Issue::ProviderInstancesUnknown {
            resource: instance.address.clone(),
            provider: source.key.clone(),
            reason: reason.unwrap_or("not evaluated").to_string(),
        };

        let selects_instance = configs
            .get(config_key)
            .is_some_and(|bound| bound.instance_key.is_some());
        let key = match (&instance.provider.key, selects_instance) {
            (Some(key), _) => Some(key.clone()),
            (None, true) => match expansions.selected(config_key) {
                Some(key) => Some(key.clone()),
                None => {
                    diagnostics.log(unknown(expansions.unknown(config_key)));
                    continue;
                }
            },
            (None, false) => None,
        };
        let address = ProviderInstanceAddress::new(&source.key, key);

        let present = match (&source.for_each, expansions.get(&source.key)) {
            (None, _) => address.key.is_none(),
            (Some(_), Some(instances)) => instances.contains(address.key.as_ref()),
            (Some(_), None) => {
                diagnostics.log(unknown(expansions.unknown(&source.key)));
                continue;
            }
        };

        if !present {
            diagnostics.log(Issue::ProviderInstanceNotPresent {
                resource: instance.address.clone(),
                provider: address.to_string(),
            });
        }
    }

    diagnostics
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collector::{collect, Mode};
    use crate::eval::ModuleValues;
    use crate::instances::{InstanceKey, ProviderInstances};
    use crate::module_tree;
    use crate::schema::Schemas;
    use pretty_assertions::assert_eq;

    fn check(tree: &ModuleTree) -> Diagnostics {
        let collection = collect(tree, Mode::Full(&Schemas::new()));
        validate(tree, &collection)
    }

    #[test]
    fn for_each_without_alias() {
        let tree = module_tree! {r#"
        provider "aws" {
          for_each = { a = {} }
        }
        "#};

        assert_eq!(
            check(&tree).issues(),
            &[Issue::ForEachWithoutAlias {
                module: "the root module".into(),
                name: "aws".into()
            }]
        );
    }

    #[test]
    fn missing_and_unexpected_instance_keys() {
        let tree = module_tree! {r#"
        provider "aws" {
          alias    = "by_region"
          for_each = { x = {}, y = {} }
        }
        provider "aws" {
          alias = "west"
        }
        resource "aws_instance" "unkeyed" {
          provider = aws.by_region
        }
        resource "aws_instance" "keyed" {
          provider = aws.west["x"]
        }
        "#};

        assert_eq!(
            check(&tree).issues(),
            &[
                Issue::MissingInstanceKey {
                    subject: "aws_instance.unkeyed".into(),
                    provider: "aws.by_region".into()
                },
                Issue::UnexpectedInstanceKey {
                    subject: "aws_instance.keyed".into(),
                    provider: "aws.west".into()
                },
            ]
        );
    }

    #[test]
    fn identical_for_each_warns() {
        let tree = module_tree! {r#"
        provider "aws" {
          alias    = "by_region"
          for_each = {"x" = {}, "y" = {}}
        }
        resource "aws_instance" "per_region" {
          for_each = {"x" = {}, "y" = {}}
          provider = aws.by_region[each.key]
        }
        resource "aws_instance" "subset" {
          for_each = {"x" = {}}
          provider = aws.by_region[each.key]
        }
        "#};

        let diagnostics = check(&tree);
        assert!(!diagnostics.has_errors());
        let warnings: Vec<&Issue> = diagnostics.warnings().collect();
        assert_eq!(
            warnings,
            vec![&Issue::ForEachCollision {
                resource: "aws_instance.per_region".into(),
                provider: "aws.by_region".into()
            }]
        );
    }

    #[test]
    fn module_call_must_select_instance() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {
              alias    = "by_region"
              for_each = { x = {} }
            }
            module "unkeyed" {
              source    = "./child"
              providers = { aws = aws.by_region }
            }
            module "keyed" {
              source    = "./child"
              providers = { aws = aws.by_region["x"] }
            }
            "#,
            "./child" => r#"resource "aws_instance" "x" {}"#
        };

        // the resources in module.keyed use one fixed instance and need no key
        assert_eq!(
            check(&tree).issues(),
            &[
                Issue::MissingInstanceKey {
                    subject: "module.unkeyed".into(),
                    provider: "aws.by_region".into()
                },
                Issue::MissingInstanceKey {
                    subject: "module.unkeyed.aws_instance.x".into(),
                    provider: "aws.by_region".into()
                },
            ]
        );
    }

    fn evaluated(tree: &ModuleTree) -> (ProviderConfigs, ProviderExpansions) {
        let configs = collect(tree, Mode::Full(&Schemas::new())).configs;
        let expansions = ProviderExpansions::evaluate(&ModuleValues::new(tree), &configs);
        (configs, expansions)
    }

    fn prior(address: &str, config_key: &str, key: Option<&str>) -> PriorResourceInstance {
        PriorResourceInstance {
            address: address.into(),
            provider: ProviderInstanceAddress::new(config_key, key.map(InstanceKey::new)),
        }
    }

    #[test]
    fn removed_instance_key_is_an_error() {
        let tree = module_tree! {r#"
        provider "aws" {
          alias    = "by_region"
          for_each = { a = {}, b = {} }
        }
        provider "aws" {
          alias    = "dynamic"
          for_each = var.regions
        }
        "#};
        let (configs, mut expansions) = evaluated(&tree);
        assert_eq!(
            expansions.get("aws.by_region").unwrap().keys().len(),
            2,
            "constant for_each must fold"
        );
        assert!(expansions.get("aws.dynamic").is_none());
        assert!(expansions.unknown("aws.dynamic").is_some());

        // key "b" removed from the configuration
        expansions.insert(
            "aws.by_region",
            ProviderInstances::Set(["a".to_string()].into_iter().collect()),
        );

        let diagnostics = validate_prior_state(
            &configs,
            &expansions,
            &[
                prior(r#"aws_instance.x["a"]"#, "aws.by_region", Some("a")),
                prior(r#"aws_instance.x["b"]"#, "aws.by_region", Some("b")),
                prior("aws_instance.y", "aws.dynamic", Some("anything")),
                prior("aws_instance.z", "aws.gone", None),
            ],
        );

        assert_eq!(
            diagnostics.errors().cloned().collect::<Vec<_>>(),
            vec![
                Issue::ProviderInstanceNotPresent {
                    resource: r#"aws_instance.x["b"]"#.into(),
                    provider: r#"aws.by_region["b"]"#.into()
                },
                Issue::ProviderConfigNotPresent {
                    resource: "aws_instance.z".into(),
                    provider: "aws.gone".into()
                },
            ]
        );

        let warnings: Vec<&Issue> = diagnostics.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            Issue::ProviderInstancesUnknown { resource, provider, .. }
                if resource == "aws_instance.y" && provider == "aws.dynamic"
        ));
    }

    #[test]
    fn sets_and_variable_defaults_fold() {
        let tree = module_tree! {r#"
        variable "regions" {
          default = { x = {}, y = {} }
        }
        provider "aws" {
          alias    = "by_set"
          for_each = toset(["x", "y"])
        }
        provider "aws" {
          alias    = "by_var"
          for_each = var.regions
        }
        "#};
        let (configs, expansions) = evaluated(&tree);

        let diagnostics = validate_prior_state(
            &configs,
            &expansions,
            &[
                prior(r#"aws_instance.a["x"]"#, "aws.by_set", Some("x")),
                prior(r#"aws_instance.a["z"]"#, "aws.by_set", Some("z")),
                prior(r#"aws_instance.b["y"]"#, "aws.by_var", Some("y")),
                prior(r#"aws_instance.b["z"]"#, "aws.by_var", Some("z")),
            ],
        );

        assert_eq!(
            diagnostics.issues(),
            &[
                Issue::ProviderInstanceNotPresent {
                    resource: r#"aws_instance.a["z"]"#.into(),
                    provider: r#"aws.by_set["z"]"#.into()
                },
                Issue::ProviderInstanceNotPresent {
                    resource: r#"aws_instance.b["z"]"#.into(),
                    provider: r#"aws.by_var["z"]"#.into()
                },
            ]
        );
    }

    #[test]
    fn pass_through_stands_for_the_selected_instance() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {
              alias    = "by_region"
              for_each = toset(["x", "y"])
            }
            module "current" {
              source    = "./child"
              providers = { aws = aws.by_region["x"] }
            }
            module "removed" {
              source    = "./child"
              providers = { aws = aws.by_region["z"] }
            }
            "#,
            "./child" => r#"resource "aws_instance" "a" {}"#
        };
        let (configs, expansions) = evaluated(&tree);
        assert_eq!(
            expansions.selected("module.current:aws"),
            Some(&InstanceKey::new("x"))
        );

        let diagnostics = validate_prior_state(
            &configs,
            &expansions,
            &[
                prior("module.current.aws_instance.a", "module.current:aws", None),
                prior("module.removed.aws_instance.a", "module.removed:aws", None),
            ],
        );

        assert_eq!(
            diagnostics.issues(),
            &[Issue::ProviderInstanceNotPresent {
                resource: "module.removed.aws_instance.a".into(),
                provider: r#"aws.by_region["z"]"#.into()
            }]
        );
    }

    #[test]
    fn prior_state_deserializes() {
        let prior: Vec<PriorResourceInstance> = serde_json::from_str(
            r#"[
              { "address": "aws_instance.a", "provider": { "config_key": "aws" } },
              { "address": "aws_instance.b[\"x\"]", "provider": { "config_key": "aws.by_region", "key": "x" } }
            ]"#,
        )
        .unwrap();
        assert_eq!(prior[0].provider.key, None);
        assert_eq!(prior[1].provider.to_string(), r#"aws.by_region["x"]"#);
    }
}
