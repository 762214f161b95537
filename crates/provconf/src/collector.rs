//! flatten the provider configurations of a module tree
//!
//! Every provider configuration of every module gets one [ProviderConfigDescriptor], keyed by its
//! opaque key ([opaque_provider_key]). Modules are visited top down so that a parent's entries
//! exist before its children link to them:
//!
//! 1. `provider` blocks
//! 2. `required_providers` entries (and their `configuration_aliases`) without a block
//! 3. providers only implied by resource types
//! 4. configurations passed to child modules through `providers = { ... }`
//! 5. the child modules themselves
//!
//! Entries created in steps 2 to 4 link to their ancestor through
//! [ProviderConfigDescriptor::parent_key], resolved with [find_source_provider_key] so every link
//! points at the declaring configuration directly.
use crate::addrs::{
    opaque_provider_key, ModulePath, Provider, Reference, ResourceAddr, TraversalPath,
};
use crate::module_tree::{version_constraints_string, Module, ModuleNode, ModuleTree, Resource};
use crate::resolver::find_source_provider_key;
use crate::schema::{SchemaBlock, Schemas};
use hcl::{Body, Expression};
use indexmap::IndexMap;

/// How much detail to collect
#[derive(Debug, Clone, Copy)]
pub enum Mode<'s> {
    /// the whole tree, with schemas for marshalling expressions
    Full(&'s Schemas),
    /// the root module only, addresses without expressions or schemas
    SingleModule,
}

impl<'s> Mode<'s> {
    pub fn schemas(&self) -> Option<&'s Schemas> {
        match self {
            Mode::Full(schemas) => Some(schemas),
            Mode::SingleModule => None,
        }
    }

    pub fn is_single_module(&self) -> bool {
        matches!(self, Mode::SingleModule)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfigDescriptor {
    pub key: String,
    /// local name, `name.alias` for configurations passed to a module
    pub name: String,
    pub provider: Provider,
    pub alias: Option<String>,
    pub module: ModulePath,
    pub version_constraint: Option<String>,
    pub for_each: Option<Expression>,
    /// unevaluated body of the `provider` block
    pub config: Option<Body>,
    pub schema: Option<SchemaBlock>,
    /// set for entries that only exist because an ancestor's configuration is used
    pub parent_key: Option<String>,
    /// instance chosen when a `for_each` configuration is passed to a module as `name.alias[key]`
    pub instance_key: Option<SelectedInstance>,
}

/// An instance key expression and the module it is written in
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedInstance {
    pub key: Expression,
    pub module: ModulePath,
}

impl ProviderConfigDescriptor {
    fn placeholder(key: String, name: impl Into<String>, provider: Provider, module: &ModulePath) -> Self {
        Self {
            key,
            name: name.into(),
            provider,
            alias: None,
            module: module.clone(),
            version_constraint: None,
            for_each: None,
            config: None,
            schema: None,
            parent_key: None,
            instance_key: None,
        }
    }

    /// An entry that is not derived from an ancestor's configuration
    pub fn is_source(&self) -> bool {
        self.parent_key.is_none()
    }
}

/// Flattened provider configurations of a module tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfigs {
    entries: IndexMap<String, ProviderConfigDescriptor>,
}

impl ProviderConfigs {
    pub fn get(&self, key: &str) -> Option<&ProviderConfigDescriptor> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProviderConfigDescriptor)> {
        self.entries.iter()
    }

    /// Entries without a parent key
    pub fn sources(&self) -> impl Iterator<Item = (&String, &ProviderConfigDescriptor)> {
        self.entries
            .iter()
            .filter(|(_, descriptor)| descriptor.is_source())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The parent key of `key` if both are in the map, `key` otherwise
    pub fn normalized_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.entries
            .get(key)
            .and_then(|descriptor| descriptor.parent_key.as_deref())
            .filter(|parent_key| self.entries.contains_key(*parent_key))
            .unwrap_or(key)
    }

    /// The descriptor `key` normalizes to
    pub fn source_of(&self, key: &str) -> Option<&ProviderConfigDescriptor> {
        self.get(self.normalized_key(key))
    }

    pub fn insert(&mut self, descriptor: ProviderConfigDescriptor) -> Option<ProviderConfigDescriptor> {
        self.entries.insert(descriptor.key.clone(), descriptor)
    }
}

impl FromIterator<ProviderConfigDescriptor> for ProviderConfigs {
    fn from_iter<T: IntoIterator<Item = ProviderConfigDescriptor>>(iter: T) -> Self {
        let mut configs = Self::default();
        for descriptor in iter {
            configs.insert(descriptor);
        }
        configs
    }
}

/// A resource bound to a provider configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub addr: ResourceAddr,
    pub module: ModulePath,
    pub provider: Provider,
    /// key of the configuration named by the resource in its own module
    pub config_key: String,
    /// `config_key` after normalization, the key exported as `provider_config_key`
    pub provider_config_key: String,
    pub instance_key: Option<Expression>,
    pub count: Option<Expression>,
    pub for_each: Option<Expression>,
    /// referenced addresses, entries that do not parse are skipped
    pub depends_on: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(module_path: &ModulePath, module: &Module, resource: &Resource) -> Self {
        let config_key =
            opaque_provider_key(&resource.provider.config.string_compact(), module_path);
        Self {
            addr: resource.addr.clone(),
            module: module_path.clone(),
            provider: module.provider_for_local_name(&resource.provider.config.local_name),
            provider_config_key: config_key.clone(),
            config_key,
            instance_key: resource.provider.key.clone(),
            count: resource.count.clone(),
            for_each: resource.for_each.clone(),
            depends_on: dependencies(&resource.depends_on),
        }
    }

    /// `module.a.aws_instance.x`
    pub fn absolute_address(&self) -> String {
        if self.module.is_root() {
            self.addr.to_string()
        } else {
            format!("{}.{}", self.module, self.addr)
        }
    }
}

/// Resources of one module and its descendants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleResources {
    pub path: ModulePath,
    pub resources: Vec<ResourceDescriptor>,
    /// keyed by module call name
    pub children: IndexMap<String, ModuleResources>,
}

impl ModuleResources {
    /// All resources, parents before children
    pub fn iter(&self) -> Box<dyn Iterator<Item = &ResourceDescriptor> + '_> {
        Box::new(
            self.resources
                .iter()
                .chain(self.children.values().flat_map(|child| child.iter())),
        )
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut ResourceDescriptor> + '_> {
        Box::new(
            self.resources
                .iter_mut()
                .chain(self.children.values_mut().flat_map(|child| child.iter_mut())),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub configs: ProviderConfigs,
    pub resources: ModuleResources,
}

/// Collect the provider configurations and resource bindings of `tree`
#[tracing::instrument(skip_all)]
pub fn collect(tree: &ModuleTree, mode: Mode) -> Collection {
    let mut collector = Collector {
        tree,
        mode,
        configs: ProviderConfigs::default(),
    };
    let resources = collector.module(tree.root());
    tracing::debug!(configs = collector.configs.len(), "provider configurations collected");

    Collection {
        configs: collector.configs,
        resources,
    }
}

/// Referenced subjects of `depends_on` entries
pub fn dependencies(depends_on: &[Expression]) -> Vec<String> {
    depends_on
        .iter()
        .filter_map(|expression| {
            let path = TraversalPath::from_expression(expression)?;
            match Reference::parse(&path) {
                Ok(reference) => Some(reference.subject.to_string()),
                Err(err) => {
                    tracing::debug!(%err, "skipping depends_on entry");
                    None
                }
            }
        })
        .collect()
}

struct Collector<'t, 's> {
    tree: &'t ModuleTree,
    mode: Mode<'s>,
    configs: ProviderConfigs,
}

impl Collector<'_, '_> {
    fn module(&mut self, node: &ModuleNode) -> ModuleResources {
        let _span = tracing::debug_span!("module", path=%node.path).entered();
        let module = &node.module;
        let path = &node.path;
        let parent_path = node.parent.map(|parent| self.tree.node(parent).path.clone());
        let requirements = module.provider_requirements_shallow();
        let version_of = |provider: &Provider| {
            requirements
                .get(provider)
                .and_then(|constraints| version_constraints_string(constraints))
        };

        for (compact_name, block) in &module.provider_configs {
            if block.for_each.is_some() && block.alias.is_none() {
                tracing::warn!(provider=%compact_name, "for_each without alias, skipping configuration");
                continue;
            }

            let provider = module.provider_for_local_name(&block.name);
            let key = opaque_provider_key(compact_name, path);
            let descriptor = ProviderConfigDescriptor {
                name: block.name.clone(),
                alias: block.alias.clone(),
                module: path.clone(),
                version_constraint: version_of(&provider),
                for_each: block.for_each.clone(),
                config: Some(block.config.clone()),
                schema: self
                    .mode
                    .schemas()
                    .and_then(|schemas| schemas.provider_config(&provider))
                    .cloned(),
                parent_key: None,
                instance_key: None,
                provider,
                key,
            };

            if let Some(replaced) = self.configs.insert(descriptor) {
                tracing::info!(
                    key=%replaced.key,
                    "provider block overrides the configuration passed in by the calling module"
                );
            }
        }

        for required in module.required_providers.values() {
            for alias in &required.aliases {
                let compact_name = alias.string_compact();
                let key = opaque_provider_key(&compact_name, path);
                if self.configs.contains_key(&key) {
                    continue;
                }

                let mut descriptor =
                    ProviderConfigDescriptor::placeholder(key, &required.name, required.provider.clone(), path);
                descriptor.alias = alias.alias.clone();
                descriptor.version_constraint = version_of(&required.provider);
                descriptor.parent_key = self.inherit(parent_path.as_ref(), &compact_name, &required.provider);
                self.configs.insert(descriptor);
            }

            let key = opaque_provider_key(&required.name, path);
            if self.configs.contains_key(&key) {
                continue;
            }

            let mut descriptor =
                ProviderConfigDescriptor::placeholder(key, &required.name, required.provider.clone(), path);
            descriptor.version_constraint = version_of(&required.provider);
            descriptor.parent_key = self.inherit(parent_path.as_ref(), &required.name, &required.provider);
            self.configs.insert(descriptor);
        }

        // only default configurations exist implicitly, their local name is the type name
        for provider in requirements.keys() {
            let key = opaque_provider_key(&provider.type_name, path);
            if self.configs.contains_key(&key) {
                continue;
            }

            let mut descriptor =
                ProviderConfigDescriptor::placeholder(key, &provider.type_name, provider.clone(), path);
            descriptor.parent_key = self.inherit(parent_path.as_ref(), &provider.type_name, provider);
            self.configs.insert(descriptor);
        }

        let mut resources = ModuleResources {
            path: path.clone(),
            resources: module
                .resources
                .values()
                .map(|resource| ResourceDescriptor::new(path, module, resource))
                .collect(),
            children: IndexMap::new(),
        };

        for (call_name, call) in &module.module_calls {
            let child = self.tree.child(node, call_name);
            let child_path = path.child(call_name);

            for passed in &call.providers {
                let in_child = passed.in_child.string_compact();
                let in_parent = passed.in_parent.config.string_compact();

                // the child's name for the provider decides its type
                let provider = match child {
                    Some(child) => child.module.provider_for_local_name(&passed.in_child.local_name),
                    None => module.provider_for_local_name(&passed.in_parent.config.local_name),
                };

                let parent_key = opaque_provider_key(&in_parent, path);
                let instance_key = match &passed.in_parent.key {
                    Some(key) => Some(SelectedInstance {
                        key: key.clone(),
                        module: path.clone(),
                    }),
                    None => self
                        .configs
                        .get(&parent_key)
                        .and_then(|descriptor| descriptor.instance_key.clone()),
                };

                let key = opaque_provider_key(&in_child, &child_path);
                let mut descriptor =
                    ProviderConfigDescriptor::placeholder(key, in_child, provider, &child_path);
                descriptor.parent_key =
                    find_source_provider_key(&parent_key, &descriptor.provider, &self.configs);
                descriptor.instance_key = instance_key;
                self.configs.insert(descriptor);
            }

            if self.mode.is_single_module() {
                continue;
            }
            if let Some(child) = child {
                let child_resources = self.module(child);
                resources.children.insert(call_name.clone(), child_resources);
            }
        }

        resources
    }

    /// Parent key for an entry of a child module that inherits `local_name` from its parent
    fn inherit(
        &self,
        parent_path: Option<&ModulePath>,
        local_name: &str,
        provider: &Provider,
    ) -> Option<String> {
        let parent_path = parent_path?;
        find_source_provider_key(
            &opaque_provider_key(local_name, parent_path),
            provider,
            &self.configs,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module_tree;
    use pretty_assertions::assert_eq;

    fn keys(configs: &ProviderConfigs) -> Vec<&str> {
        configs.iter().map(|(key, _)| key.as_str()).collect()
    }

    #[test]
    fn default_and_aliased_configurations() {
        let tree = module_tree! {r#"
        provider "aws" {
          region = "us-east-1"
        }
        provider "aws" {
          alias  = "west"
          region = "us-west-2"
        }
        resource "aws_instance" "default" {}
        resource "aws_instance" "west" {
          provider = aws.west
        }
        "#};

        let collection = collect(&tree, Mode::SingleModule);
        assert_eq!(keys(&collection.configs), vec!["aws", "aws.west"]);
        assert!(collection.configs.iter().all(|(_, d)| d.is_source()));

        let bindings: Vec<(String, &str)> = collection
            .resources
            .iter()
            .map(|r| (r.addr.to_string(), r.provider_config_key.as_str()))
            .collect();
        assert_eq!(
            bindings,
            vec![
                ("aws_instance.default".to_string(), "aws"),
                ("aws_instance.west".to_string(), "aws.west")
            ]
        );
    }

    #[test]
    fn version_constraints_come_from_requirements() {
        let tree = module_tree! {r#"
        terraform {
          required_providers {
            aws = { source = "hashicorp/aws", version = ">= 4.0" }
          }
        }
        provider "aws" {
          version = "< 6.0"
        }
        "#};

        let collection = collect(&tree, Mode::SingleModule);
        assert_eq!(
            collection.configs.get("aws").unwrap().version_constraint.as_deref(),
            Some(">= 4.0, < 6.0")
        );
    }

    #[test]
    fn for_each_without_alias_has_no_descriptor() {
        let tree = module_tree! {r#"
        provider "aws" {
          for_each = { a = {} }
        }
        "#};

        let collection = collect(&tree, Mode::SingleModule);
        // step 3 still adds the implied default configuration
        let aws = collection.configs.get("aws").unwrap();
        assert!(aws.config.is_none());
        assert!(aws.for_each.is_none());
    }

    #[test]
    fn implied_providers_inherit_from_parent() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {}
            module "child" { source = "./child" }
            "#,
            "./child" => r#"resource "aws_instance" "x" {}"#
        };

        let collection = collect(&tree, Mode::Full(&Schemas::new()));
        let child_aws = collection.configs.get("module.child:aws").unwrap();
        assert_eq!(child_aws.parent_key.as_deref(), Some("aws"));
        assert_eq!(child_aws.name, "aws");
        assert_eq!(collection.configs.normalized_key("module.child:aws"), "aws");
    }

    #[test]
    fn configuration_aliases_link_to_parent() {
        let tree = module_tree! {
            "." => r#"
            terraform {
              required_providers {
                mycloud = { source = "acme/mycloud" }
              }
            }
            provider "mycloud" {
              alias = "primary"
            }
            module "child" {
              source = "./child"
              providers = {
                mycloud.alternate = mycloud.primary
              }
            }
            "#,
            "./child" => r#"
            terraform {
              required_providers {
                mycloud = {
                  source                = "acme/mycloud"
                  configuration_aliases = [mycloud.alternate]
                }
              }
            }
            resource "mycloud_thing" "x" {
              provider = mycloud.alternate
            }
            "#
        };

        let collection = collect(&tree, Mode::Full(&Schemas::new()));
        let alternate = collection
            .configs
            .get("module.child:mycloud.alternate")
            .unwrap();
        assert_eq!(alternate.name, "mycloud.alternate");
        assert_eq!(alternate.parent_key.as_deref(), Some("mycloud.primary"));

        let resource = collection.resources.iter().next().unwrap();
        assert_eq!(resource.config_key, "module.child:mycloud.alternate");
    }

    #[test]
    fn pass_through_records_selected_instance() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {
              alias    = "by_region"
              for_each = { x = {}, y = {} }
            }
            module "child" {
              source = "./child"
              providers = {
                aws = aws.by_region["x"]
              }
            }
            "#,
            "./child" => r#"module "grandchild" {
              source = "./grandchild"
              providers = { aws = aws }
            }"#,
            "./grandchild" => r#"resource "aws_instance" "x" {}"#
        };

        let collection = collect(&tree, Mode::Full(&Schemas::new()));
        let child = collection.configs.get("module.child:aws").unwrap();
        let selected = child.instance_key.as_ref().unwrap();
        assert_eq!(selected.key, Expression::from("x"));
        assert_eq!(selected.module, ModulePath::root());
        let grandchild = collection
            .configs
            .get("module.child.module.grandchild:aws")
            .unwrap();
        assert_eq!(grandchild.parent_key.as_deref(), Some("aws.by_region"));
        assert_eq!(grandchild.instance_key, child.instance_key);
    }

    #[test]
    fn explicit_block_wins_over_pass_through() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {
              alias = "west"
            }
            module "child" {
              source    = "./child"
              providers = { aws = aws.west }
            }
            "#,
            "./child" => r#"provider "aws" {
              region = "eu-central-1"
            }"#
        };

        let collection = collect(&tree, Mode::Full(&Schemas::new()));
        let child_aws = collection.configs.get("module.child:aws").unwrap();
        assert!(child_aws.is_source());
        assert!(child_aws.config.is_some());
    }

    #[test]
    fn single_module_mode_does_not_recurse() {
        let tree = module_tree! {
            "." => r#"
            provider "aws" {}
            module "child" {
              source    = "./child"
              providers = { aws = aws }
            }
            "#,
            "./child" => r#"resource "google_thing" "x" {}"#
        };

        let collection = collect(&tree, Mode::SingleModule);
        assert_eq!(keys(&collection.configs), vec!["aws", "module.child:aws"]);
        assert!(collection.resources.children.is_empty());
    }

    #[test]
    fn depends_on_skips_unparsable_entries() {
        let expressions: Vec<Expression> = ["aws_instance.a", "module.b.out", "var"]
            .iter()
            .map(|src| src.parse::<hcl_edit::expr::Expression>().unwrap().into())
            .collect();
        assert_eq!(
            dependencies(&expressions),
            vec!["aws_instance.a", "module.b.out"]
        );
    }
}
