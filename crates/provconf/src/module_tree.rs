//! static module tree
//!
//! [ModuleTree] is an arena of [ModuleNode]s indexed by [ModulePath]. Nodes refer to their parent
//! and children by [ModuleId] only, the tree owns every node.
use crate::addrs::{LocalProviderConfig, ModulePath, Provider, ResourceAddr};
use crate::instances::ProviderConfigRef;
use hcl::{Body, Expression};
use indexmap::IndexMap;

/// Module calls nested deeper than this are not followed
pub const MAX_MODULE_DEPTH: usize = 64;

/// A `provider` block
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfigBlock {
    pub name: String,
    pub alias: Option<String>,
    /// deprecated `version` argument
    pub version: Option<String>,
    pub for_each: Option<Expression>,
    /// body without meta-arguments
    pub config: Body,
}

impl ProviderConfigBlock {
    pub fn addr(&self) -> LocalProviderConfig {
        LocalProviderConfig {
            local_name: self.name.clone(),
            alias: self.alias.clone(),
        }
    }
}

/// An entry of `required_providers`
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredProvider {
    pub name: String,
    pub provider: Provider,
    pub version: Option<String>,
    /// `configuration_aliases`
    pub aliases: Vec<LocalProviderConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provisioner {
    pub type_name: String,
    pub config: Body,
}

/// A `resource`, `data` or `ephemeral` block
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub addr: ResourceAddr,
    /// the `provider` argument, or the default configuration implied by the resource type
    pub provider: ProviderConfigRef,
    pub count: Option<Expression>,
    pub for_each: Option<Expression>,
    pub depends_on: Vec<Expression>,
    pub provisioners: Vec<Provisioner>,
    /// body without meta-arguments
    pub config: Body,
}

/// One entry of a module call's `providers` argument
#[derive(Debug, Clone, PartialEq)]
pub struct PassedProvider {
    pub in_child: LocalProviderConfig,
    pub in_parent: ProviderConfigRef,
}

/// A `module` block
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCall {
    pub name: String,
    pub source: String,
    pub version: Option<String>,
    pub count: Option<Expression>,
    pub for_each: Option<Expression>,
    pub providers: Vec<PassedProvider>,
    pub depends_on: Vec<Expression>,
    /// input variables
    pub config: Body,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variable {
    pub name: String,
    pub type_constraint: Option<Expression>,
    pub default: Option<Expression>,
    pub description: Option<String>,
    pub sensitive: bool,
    pub deprecated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Output {
    pub name: String,
    pub value: Option<Expression>,
    pub description: Option<String>,
    pub sensitive: bool,
    pub deprecated: Option<String>,
    pub depends_on: Vec<Expression>,
}

/// Declarations of a single module
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// keyed by `name` or `name.alias`
    pub provider_configs: IndexMap<String, ProviderConfigBlock>,
    pub required_providers: IndexMap<String, RequiredProvider>,
    /// keyed by relative resource address
    pub resources: IndexMap<String, Resource>,
    pub module_calls: IndexMap<String, ModuleCall>,
    pub variables: IndexMap<String, Variable>,
    pub outputs: IndexMap<String, Output>,
}

impl Module {
    /// Provider type for a local provider name
    pub fn provider_for_local_name(&self, local_name: &str) -> Provider {
        match self.required_providers.get(local_name) {
            Some(required) => required.provider.clone(),
            None => Provider::implied(local_name),
        }
    }

    /// Providers required by this module alone (no descendants), with their version constraints
    ///
    /// Contains `required_providers` entries, the providers of `provider` blocks (including their
    /// deprecated `version` argument) and the providers used by resources.
    pub fn provider_requirements_shallow(&self) -> IndexMap<Provider, Vec<String>> {
        let mut requirements: IndexMap<Provider, Vec<String>> = IndexMap::new();

        for required in self.required_providers.values() {
            let constraints = requirements.entry(required.provider.clone()).or_default();
            add_constraints(constraints, required.version.as_deref());
        }

        for resource in self.resources.values() {
            let provider = self.provider_for_local_name(&resource.provider.config.local_name);
            requirements.entry(provider).or_default();
        }

        for config in self.provider_configs.values() {
            let provider = self.provider_for_local_name(&config.name);
            let constraints = requirements.entry(provider).or_default();
            add_constraints(constraints, config.version.as_deref());
        }

        requirements
    }
}

fn add_constraints(constraints: &mut Vec<String>, version: Option<&str>) {
    let Some(version) = version else {
        return;
    };
    for constraint in version.split(',').map(str::trim) {
        if !constraint.is_empty() && !constraints.iter().any(|c| c == constraint) {
            constraints.push(constraint.to_string());
        }
    }
}

/// Comma separated version constraints, `None` when unconstrained
pub fn version_constraints_string(constraints: &[String]) -> Option<String> {
    (!constraints.is_empty()).then(|| constraints.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub path: ModulePath,
    pub parent: Option<ModuleId>,
    /// keyed by module call name
    pub children: IndexMap<String, ModuleId>,
    pub module: Module,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleTree {
    nodes: IndexMap<ModulePath, ModuleNode>,
}

impl ModuleTree {
    pub fn new(root: Module) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(
            ModulePath::root(),
            ModuleNode {
                id: ModuleId(0),
                path: ModulePath::root(),
                parent: None,
                children: Default::default(),
                module: root,
            },
        );
        Self { nodes }
    }

    /// Build a tree by loading the module of every module call, breadth first
    ///
    /// `load_child` gets the path of the calling module and the call. Calls for which it returns
    /// `None` are skipped.
    pub fn build<E>(
        root: Module,
        mut load_child: impl FnMut(&ModulePath, &ModuleCall) -> Result<Option<Module>, E>,
    ) -> Result<Self, E> {
        let mut tree = Self::new(root);
        let mut queue = std::collections::VecDeque::from([tree.root().id]);

        while let Some(parent) = queue.pop_front() {
            let parent_path = tree.node(parent).path.clone();
            if parent_path.calls().len() >= MAX_MODULE_DEPTH {
                tracing::warn!(module=%parent_path, "module nesting too deep, not loading child modules");
                continue;
            }

            let calls: Vec<ModuleCall> = tree
                .node(parent)
                .module
                .module_calls
                .values()
                .cloned()
                .collect();
            for call in calls {
                let Some(module) = load_child(&parent_path, &call)? else {
                    tracing::warn!(module=%parent_path, call=%call.name, source=%call.source, "child module not available");
                    continue;
                };
                queue.push_back(tree.add_child(parent, &call.name, module));
            }
        }

        Ok(tree)
    }

    pub fn add_child(&mut self, parent: ModuleId, call_name: &str, module: Module) -> ModuleId {
        let path = self.node(parent).path.child(call_name);
        let id = ModuleId(self.nodes.len());
        tracing::debug!(module=%path, "add module");

        if let Some(existing) = self.nodes.get(&path) {
            tracing::warn!(module=%path, "module added twice, keeping the first");
            return existing.id;
        }

        self.nodes.insert(
            path.clone(),
            ModuleNode {
                id,
                path,
                parent: Some(parent),
                children: Default::default(),
                module,
            },
        );
        self.node_mut(parent)
            .children
            .insert(call_name.to_string(), id);
        id
    }

    pub fn root(&self) -> &ModuleNode {
        self.node(ModuleId(0))
    }

    /// # Panic
    /// Panics if `id` belongs to another tree
    pub fn node(&self, id: ModuleId) -> &ModuleNode {
        self.nodes
            .get_index(id.0)
            .map(|(_, node)| node)
            .expect("module id must belong to this tree")
    }

    fn node_mut(&mut self, id: ModuleId) -> &mut ModuleNode {
        self.nodes
            .get_index_mut(id.0)
            .map(|(_, node)| node)
            .expect("module id must belong to this tree")
    }

    pub fn get(&self, path: &ModulePath) -> Option<&ModuleNode> {
        self.nodes.get(path)
    }

    pub fn parent(&self, node: &ModuleNode) -> Option<&ModuleNode> {
        node.parent.map(|parent| self.node(parent))
    }

    pub fn child(&self, node: &ModuleNode, call_name: &str) -> Option<&ModuleNode> {
        node.children.get(call_name).map(|child| self.node(*child))
    }

    /// All nodes, parents before their children
    pub fn iter(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A tree holding only a copy of the root module
    pub fn single_module(&self) -> Self {
        Self::new(self.root().module.clone())
    }

    /// Every provider required anywhere in the tree, in first use order
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers = indexmap::IndexSet::new();
        for node in self.iter() {
            providers.extend(node.module.provider_requirements_shallow().into_keys());
        }
        providers.into_iter().collect()
    }
}
