//! load modules from `.tf` files
//!
//! A module is every `*.tf` file in one directory, read in file name order and decoded as a
//! single body. Child modules are followed when their `source` is a local path (`./` or `../`);
//! registry and remote sources are left out of the tree.
use crate::addrs::ModulePath;
use crate::decode::{decode_module, DecodeErrors};
use crate::module_tree::{Module, ModuleTree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MODULE_FILE_SUFFIX: &str = ".tf";

pub fn load_file(file_path: &Path) -> Result<hcl::Body, LoadError> {
    tracing::info!(path=%file_path.display(), "loading file");

    let file_contents = std::fs::read_to_string(file_path)?;
    let body = hcl_edit::parser::parse_body(&file_contents)?;
    Ok(body.into())
}

pub fn load_module_dir(dir_path: &Path) -> Result<Module, LoadError> {
    let mut file_paths = vec![];
    for dir_entry in std::fs::read_dir(dir_path)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }
        if !dir_entry
            .file_name()
            .to_string_lossy()
            .ends_with(MODULE_FILE_SUFFIX)
        {
            continue;
        }
        file_paths.push(dir_entry.path());
    }

    if file_paths.is_empty() {
        return Err(LoadError::NoFilesFound(dir_path.to_path_buf()));
    }
    file_paths.sort();

    let mut structures = vec![];
    for file_path in &file_paths {
        structures.extend(load_file(file_path)?);
    }

    let body: hcl::Body = structures.into_iter().collect();
    Ok(decode_module(&body)?)
}

/// Load the module in `root_dir` and every module reachable through local module sources
#[tracing::instrument]
pub fn load_module_tree(root_dir: &Path) -> Result<ModuleTree, LoadError> {
    let root_dir = root_dir.canonicalize()?;
    let root = load_module_dir(&root_dir)?;

    let mut dirs: HashMap<ModulePath, PathBuf> = HashMap::from([(ModulePath::root(), root_dir)]);
    ModuleTree::build(root, |parent, call| {
        if !is_local_source(&call.source) {
            tracing::debug!(call=%call.name, source=%call.source, "not a local module source");
            return Ok(None);
        }
        let Some(parent_dir) = dirs.get(parent) else {
            return Ok(None);
        };

        let dir = parent_dir.join(&call.source);
        if !dir.is_dir() {
            return Ok(None);
        }

        let module = load_module_dir(&dir)?;
        dirs.insert(parent.child(&call.name), dir);
        Ok(Some(module))
    })
}

fn is_local_source(source: &str) -> bool {
    source == "." || source == ".." || source.starts_with("./") || source.starts_with("../")
}

/// Decode a module from hcl source text
pub fn parse_module(src: &str) -> Result<Module, LoadError> {
    let body: hcl::Body = hcl_edit::parser::parse_body(src)?.into();
    Ok(decode_module(&body)?)
}

/// Build a tree from `(source, hcl)` pairs, the first being the root module
///
/// Module calls are looked up by their `source` string. Used by [module_tree!](crate::module_tree!).
#[doc(hidden)]
pub fn tree_from_sources(modules: &[(&str, &str)]) -> Result<ModuleTree, LoadError> {
    let Some((_, root)) = modules.first() else {
        return Ok(ModuleTree::new(Module::default()));
    };

    ModuleTree::build(parse_module(root)?, |_, call| {
        modules
            .iter()
            .find(|(source, _)| *source == call.source)
            .map(|(_, src)| parse_module(src))
            .transpose()
    })
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No .tf files found in directory {0}")]
    NoFilesFound(PathBuf),
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
    #[error("Invalid module configuration")]
    Decode(#[from] DecodeErrors),
}

/// Utility macro to create a [ModuleTree]
///
/// Create from a single (root) module
/// ```
/// # use provconf::module_tree;
/// module_tree!(r#"provider "aws" {}"#);
/// ```
///
/// Create from multiple modules, keyed by the `source` their callers use. The first one is the
/// root module.
/// ```
/// # use provconf::module_tree;
/// let tree = module_tree! {
///   "." => r#"module "child" { source = "./child" }"#,
///   "./child" => r#"resource "null_resource" "x" {}"#
/// };
/// assert_eq!(tree.len(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use provconf::module_tree;
/// module_tree!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! module_tree {
    // single module
    { $expr:expr } => {
        $crate::loader::tree_from_sources(&[(".", $expr)]).expect("module tree must load")
    };
    // multiple modules keyed by source
    { $($source:expr => $expr:expr),+ $(,)? } => {
        $crate::loader::tree_from_sources(&[$(($source, $expr)),+]).expect("module tree must load")
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn local_sources() {
        assert!(is_local_source("./child"));
        assert!(is_local_source("../shared"));
        assert!(!is_local_source("hashicorp/consul/aws"));
        assert!(!is_local_source("git::https://example.com/module.git"));
    }

    #[test]
    fn load_fixture_tree() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pass_through");
        let tree = load_module_tree(&dir).unwrap();

        let paths: Vec<String> = tree.iter().map(|node| node.path.to_string()).collect();
        assert_eq!(paths, vec!["", "module.child", "module.child.module.grandchild"]);
    }

    #[test]
    fn missing_directory() {
        assert!(matches!(
            load_module_dir(Path::new("/does/not/exist")),
            Err(LoadError::IoError(_))
        ));
    }

    #[test]
    fn decode_errors_propagate() {
        assert!(matches!(
            parse_module("attribute = 1"),
            Err(LoadError::Decode(_))
        ));
    }
}
