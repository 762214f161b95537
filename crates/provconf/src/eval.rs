//! constant folding of expressions
//!
//! This is not a full evaluator. The context only has the type conversion functions, and `var` is
//! bound to the input variable values that are known without planning: defaults, or module call
//! arguments that fold to constants themselves.
use crate::addrs::ModulePath;
use crate::module_tree::{ModuleNode, ModuleTree};
use hcl::eval::{Context, Evaluate, FuncArgs, FuncDef, ParamType};
use hcl::{Expression, Map, Value};
use indexmap::IndexMap;

/// Context with the type conversion functions and no variables
pub fn base_context<'a>() -> Context<'a> {
    let mut context = Context::new();
    context.declare_func(
        "toset",
        FuncDef::builder()
            .param(ParamType::array_of(ParamType::Any))
            .build(toset),
    );
    context.declare_func(
        "tolist",
        FuncDef::builder()
            .param(ParamType::array_of(ParamType::Any))
            .build(first_argument),
    );
    context.declare_func(
        "tomap",
        FuncDef::builder()
            .param(ParamType::object_of(ParamType::Any))
            .build(first_argument),
    );
    context
}

fn first_argument(args: FuncArgs) -> Result<Value, String> {
    args.into_values()
        .into_iter()
        .next()
        .ok_or_else(|| "missing argument".to_string())
}

/// Sets are tuples without duplicates, in first-seen order
fn toset(args: FuncArgs) -> Result<Value, String> {
    let Value::Array(elements) = first_argument(args)? else {
        return Err("toset expects a list".to_string());
    };

    let mut set: Vec<Value> = Vec::with_capacity(elements.len());
    for element in elements {
        if !set.contains(&element) {
            set.push(element);
        }
    }
    Ok(Value::Array(set))
}

/// Input variable values of every module of a tree that fold to constants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleValues {
    variables: IndexMap<ModulePath, Map<String, Value>>,
}

impl ModuleValues {
    #[tracing::instrument(skip_all)]
    pub fn new(tree: &ModuleTree) -> Self {
        let mut values = Self::default();
        // parents are always visited before their children
        for node in tree.iter() {
            let known = values.known_variables(tree, node);
            values.variables.insert(node.path.clone(), known);
        }
        values
    }

    fn known_variables(&self, tree: &ModuleTree, node: &ModuleNode) -> Map<String, Value> {
        let call = tree.parent(node).and_then(|parent| {
            let call_name = node.path.calls().last()?;
            Some((parent, parent.module.module_calls.get(call_name)?))
        });

        let mut known = Map::new();
        for variable in node.module.variables.values() {
            let argument = call.and_then(|(parent, call)| {
                call.config
                    .attributes()
                    .find(|attribute| attribute.key.as_str() == variable.name)
                    .map(|attribute| (parent, &attribute.expr))
            });

            // an argument replaces the default, even when it does not fold
            let folded = match argument {
                Some((parent, expression)) => fold(expression, &self.context(&parent.path)),
                None => match &variable.default {
                    Some(default) => fold(default, &base_context()),
                    None => continue,
                },
            };

            match folded {
                Ok(value) => {
                    known.insert(variable.name.clone(), value);
                }
                Err(err) => {
                    tracing::debug!(module=%node.path, variable=%variable.name, %err, "variable value unknown");
                }
            }
        }
        known
    }

    /// Known values of the input variables of `module`
    pub fn variables(&self, module: &ModulePath) -> Option<&Map<String, Value>> {
        self.variables.get(module)
    }

    /// Context for folding expressions written in `module`
    pub fn context(&self, module: &ModulePath) -> Context<'static> {
        let mut context = base_context();
        if let Some(variables) = self.variables.get(module) {
            context.declare_var("var", Value::Object(variables.clone()));
        }
        context
    }
}

pub fn fold(expression: &Expression, context: &Context) -> Result<Value, hcl::eval::Error> {
    expression.evaluate(context)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module_tree;
    use pretty_assertions::assert_eq;

    fn expr(src: &str) -> Expression {
        let expr: hcl_edit::expr::Expression = src.parse().unwrap();
        expr.into()
    }

    fn strings(elements: &[&str]) -> Value {
        Value::Array(elements.iter().map(|element| Value::from(*element)).collect())
    }

    #[test]
    fn conversion_functions() {
        let context = base_context();
        assert_eq!(
            fold(&expr(r#"toset(["b", "a", "b"])"#), &context).unwrap(),
            strings(&["b", "a"])
        );
        assert_eq!(
            fold(&expr(r#"tolist(["a"])"#), &context).unwrap(),
            strings(&["a"])
        );
        assert_eq!(
            fold(&expr(r#"tomap({ a = 1 })"#), &context).unwrap(),
            fold(&expr("{ a = 1 }"), &context).unwrap()
        );
        assert!(fold(&expr(r#"toset("a")"#), &context).is_err());
        assert!(fold(&expr(r#"lookup({}, "a")"#), &context).is_err());
    }

    #[test]
    fn defaults_and_module_arguments() {
        let tree = module_tree! {
            "." => r#"
            variable "regions" {
              default = ["x", "y"]
            }
            variable "unset" {}
            module "child" {
              source  = "./child"
              regions = toset(var.regions)
              zone    = each.key
            }
            "#,
            "./child" => r#"
            variable "regions" {}
            variable "zone" {
              default = "a"
            }
            variable "tier" {
              default = "small"
            }
            "#
        };

        let values = ModuleValues::new(&tree);

        let root = values.variables(&ModulePath::root()).unwrap();
        assert_eq!(root.get("regions"), Some(&strings(&["x", "y"])));
        assert_eq!(root.get("unset"), None);

        let child = values
            .variables(&ModulePath::root().child("child"))
            .unwrap();
        assert_eq!(child.get("regions"), Some(&strings(&["x", "y"])));
        // set by the call, but not a constant
        assert_eq!(child.get("zone"), None);
        assert_eq!(child.get("tier"), Some(&Value::from("small")));

        let context = values.context(&ModulePath::root());
        assert_eq!(
            fold(&expr("var.regions[1]"), &context).unwrap(),
            Value::from("y")
        );
    }
}
