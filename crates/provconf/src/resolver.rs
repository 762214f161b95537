//! walk `parent_key` chains back to the declaring configuration
use crate::addrs::Provider;
use crate::collector::{ModuleResources, ProviderConfigs};
use std::collections::HashSet;

/// Follow the parent keys starting at `start_key` while the entries exist and are of type
/// `provider`
///
/// Returns the last key that matched, `None` if `start_key` itself does not. The type check at
/// every hop keeps a renamed pass-through from resolving to an unrelated configuration that
/// happens to share a name.
pub fn find_source_provider_key(
    start_key: &str,
    provider: &Provider,
    configs: &ProviderConfigs,
) -> Option<String> {
    let mut found = None;
    let mut seen = HashSet::new();
    let mut key = Some(start_key.to_string());

    while let Some(current) = key {
        if !seen.insert(current.clone()) {
            tracing::error!(key=%current, "cycle in provider configuration chain");
            break;
        }
        let Some(descriptor) = configs.get(&current) else {
            break;
        };
        if &descriptor.provider != provider {
            tracing::trace!(key=%current, expected=%provider, found=%descriptor.provider, "provider type differs, chain ends");
            break;
        }
        key = descriptor.parent_key.clone();
        found = Some(current);
    }

    found
}

/// Point every resource at the declaring configuration instead of a pass-through placeholder
pub fn normalize_resource_keys(resources: &mut ModuleResources, configs: &ProviderConfigs) {
    for resource in resources.iter_mut() {
        let normalized = configs.normalized_key(&resource.config_key);
        if normalized != resource.config_key {
            tracing::trace!(resource=%resource.absolute_address(), from=%resource.config_key, to=%normalized, "normalized provider key");
        }
        resource.provider_config_key = normalized.to_string();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addrs::ModulePath;
    use crate::collector::{collect, Mode, ProviderConfigDescriptor};
    use crate::module_tree;
    use crate::schema::Schemas;
    use pretty_assertions::assert_eq;

    fn descriptor(key: &str, provider: &str, parent_key: Option<&str>) -> ProviderConfigDescriptor {
        ProviderConfigDescriptor {
            key: key.to_string(),
            name: key.to_string(),
            provider: Provider::implied(provider),
            alias: None,
            module: ModulePath::root(),
            version_constraint: None,
            for_each: None,
            config: None,
            schema: None,
            parent_key: parent_key.map(str::to_string),
            instance_key: None,
        }
    }

    #[test]
    fn walks_to_source() {
        let configs: ProviderConfigs = [
            descriptor("aws", "aws", None),
            descriptor("module.a:aws", "aws", Some("aws")),
            descriptor("module.a.module.b:aws", "aws", Some("module.a:aws")),
        ]
        .into_iter()
        .collect();

        let aws = Provider::implied("aws");
        assert_eq!(
            find_source_provider_key("module.a.module.b:aws", &aws, &configs).as_deref(),
            Some("aws")
        );
        assert_eq!(find_source_provider_key("module.x:aws", &aws, &configs), None);
    }

    #[test]
    fn stops_at_type_mismatch() {
        let configs: ProviderConfigs = [
            descriptor("cloud", "google", None),
            descriptor("module.a:cloud", "aws", Some("cloud")),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            find_source_provider_key("module.a:cloud", &Provider::implied("aws"), &configs)
                .as_deref(),
            Some("module.a:cloud")
        );
        assert_eq!(
            find_source_provider_key("cloud", &Provider::implied("aws"), &configs),
            None
        );
    }

    #[test]
    fn cycles_terminate() {
        let configs: ProviderConfigs = [
            descriptor("a", "aws", Some("b")),
            descriptor("b", "aws", Some("a")),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            find_source_provider_key("a", &Provider::implied("aws"), &configs).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn deep_chain_matches_stepwise_resolution() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" { alias = "main" }
            module "a" {
              source    = "./a"
              providers = { aws = aws.main }
            }
            "#,
            "./a" => r#"module "b" {
              source    = "./b"
              providers = { aws.renamed = aws }
            }"#,
            "./b" => r#"
            terraform {
              required_providers {
                aws = { source = "hashicorp/aws", configuration_aliases = [aws.renamed] }
              }
            }
            module "c" {
              source    = "./c"
              providers = { aws = aws.renamed }
            }
            "#,
            "./c" => r#"resource "aws_instance" "x" {}"#
        };

        let aws = Provider::implied("aws");
        let deepest = "module.a.module.b.module.c:aws";

        // the same chain as the tree above, one link per module call
        let chain: ProviderConfigs = [
            descriptor("aws.main", "aws", None),
            descriptor("module.a:aws", "aws", Some("aws.main")),
            descriptor("module.a.module.b:aws.renamed", "aws", Some("module.a:aws")),
            descriptor(deepest, "aws", Some("module.a.module.b:aws.renamed")),
        ]
        .into_iter()
        .collect();

        let mut stepwise = deepest.to_string();
        let mut hops = 0;
        while let Some(parent) = chain.get(&stepwise).and_then(|d| d.parent_key.clone()) {
            assert_eq!(chain.get(&parent).unwrap().provider, aws);
            stepwise = parent;
            hops += 1;
        }
        assert_eq!(hops, 3);
        assert_eq!(stepwise, "aws.main");

        for (key, _) in chain.iter() {
            assert_eq!(
                find_source_provider_key(key, &aws, &chain).as_deref(),
                Some(stepwise.as_str()),
                "{key}"
            );
        }

        // the collector links every entry of the tree directly to the same source
        let collection = collect(&tree, Mode::Full(&Schemas::new()));
        for (key, _) in chain.iter().skip(1) {
            assert_eq!(
                collection.configs.get(key).unwrap().parent_key.as_deref(),
                Some(stepwise.as_str()),
                "{key}"
            );
        }
    }

    #[test]
    fn normalized_keys_never_point_at_derived_entries() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" { alias = "west" }
            module "child" {
              source    = "./child"
              providers = { aws = aws.west }
            }
            "#,
            "./child" => r#"
            resource "aws_instance" "a" {}
            resource "google_thing" "b" {}
            "#
        };

        let mut collection = collect(&tree, Mode::Full(&Schemas::new()));
        normalize_resource_keys(&mut collection.resources, &collection.configs);

        for resource in collection.resources.iter() {
            let descriptor = collection
                .configs
                .get(&resource.provider_config_key)
                .unwrap();
            assert!(descriptor.is_source(), "{}", resource.provider_config_key);
        }
        let keys: Vec<&str> = collection
            .resources
            .iter()
            .map(|r| r.provider_config_key.as_str())
            .collect();
        assert_eq!(keys, vec!["aws.west", "module.child:google"]);
    }
}
