//! # provconf - provider configurations of hcl module trees
//!
//! Resolves which provider configuration every resource of a module tree uses, checks the
//! bindings of `for_each` provider configurations and exports the tree in the JSON shape of
//! `show -json` for configurations.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `provconf` works internally.
//!
//! ### Terms
//!
//! - a `module` is a directory of `.tf` files; the entry point is the `root module`
//! - a `module call` (`module "a" { source = "./a" }`) includes a `child module`
//! - a `provider configuration` is a `provider` block, optionally with an `alias`
//! - a `provider configuration address` names one inside a module: `aws` or `aws.west`
//!
//! ```hcl
//! provider "aws" {
//!   alias    = "by_region"
//!   for_each = { east = "us-east-1", west = "us-west-2" }
//!   region   = each.value
//! }
//!
//! module "network" {
//!   source    = "./network"
//!   providers = { aws = aws.by_region["east"] }
//! }
//!
//! resource "aws_vpc" "main" {
//!   for_each = toset(["east", "west"])
//!   provider = aws.by_region[each.key]
//! }
//! ```
//!
//! ### Loading
//!
//! see [loader::load_module_tree]
//!
//! Every `.tf` file of a directory is parsed ([hcl_edit]) and the combined body is decoded into a
//! [module_tree::Module] ([decode::decode_module]). Child modules are loaded for every module call
//! with a local source and stored in a [module_tree::ModuleTree], an arena addressed by
//! [module_tree::ModuleId] that links every node to its parent and children.
//!
//! ### Collecting provider configurations
//!
//! see [collector::collect]
//!
//! Every configuration of the tree gets one entry in a single map, keyed by an opaque key
//! ([addrs::opaque_provider_key]): `aws.west` in the root module, `module.a:aws.west` elsewhere.
//!
//! | **entry** | **created by** | **parent key** |
//! |-----------|----------------|----------------|
//! | source | `provider` block | - |
//! | placeholder | `required_providers`, `configuration_aliases` or use by a resource | inherited default of the parent module |
//! | pass-through | `providers = { ... }` of a module call | the configuration passed by the parent |
//!
//! Following the parent keys ([resolver::find_source_provider_key]) leads back to the entry that
//! declares the configuration. Resource bindings are rewritten to point at it
//! ([resolver::normalize_resource_keys]).
//!
//! ### Instances
//!
//! A configuration with `for_each` has one instance per key ([instances::ProviderInstances]).
//! Resources select an instance with `provider = aws.by_region[key]`
//! ([instances::ProviderConfigRef]). [validate::validate] checks the static rules,
//! [validate::validate_prior_state] checks prior state against the current instances, as far as
//! their `for_each` folds to a constant ([eval::ModuleValues]).
//!
//! ### Schemas
//!
//! Provider schemas are fetched through a [schema_cache::SchemaFetcher] and kept for the
//! lifetime of the process in a [schema_cache::SchemaCache]. [schema::Schemas] holds the ones
//! needed for one tree.
//!
//! ### Output
//!
//! [jsonconfig::marshal] serializes the tree via [serde]. Expressions are not evaluated, only
//! constants are folded and references are listed.
//!
pub mod addrs;
pub mod collector;
pub mod decode;
pub mod diagnostics;
pub mod eval;
pub mod instances;
pub mod jsonconfig;
pub mod loader;
pub mod module_tree;
pub mod resolver;
pub mod schema;
pub mod schema_cache;
pub mod validate;
mod visit;
