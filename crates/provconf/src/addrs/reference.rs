//! static references to referenceable objects (`var.x`, `module.a.out`, `aws_instance.b[0]`, ...)
use super::{ResourceAddr, ResourceMode};
use hcl::{Expression, Traversal, TraversalOperator};

/// Literal key used in an index step
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Number(hcl::Number),
    String(String),
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKey::Number(number) => write!(f, "[{number}]"),
            IndexKey::String(string) => write!(f, "[{string:?}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Attr(String),
    Index(IndexKey),
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Attr(name) => write!(f, ".{name}"),
            Step::Index(key) => key.fmt(f),
        }
    }
}

/// The static prefix of a traversal: a root name followed by attribute and literal index steps
///
/// Splat operators and dynamic indices end the path.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalPath {
    pub root: String,
    pub steps: Vec<Step>,
}

impl TraversalPath {
    pub fn from_expression(expression: &Expression) -> Option<Self> {
        match expression {
            Expression::Variable(variable) => Some(Self {
                root: variable.as_str().to_string(),
                steps: vec![],
            }),
            Expression::Traversal(traversal) => Self::from_traversal(traversal),
            _ => None,
        }
    }

    /// `None` unless the traversal starts at a variable
    pub fn from_traversal(traversal: &Traversal) -> Option<Self> {
        let Expression::Variable(variable) = &traversal.expr else {
            return None;
        };
        Some(Self {
            root: variable.as_str().to_string(),
            steps: static_steps(&traversal.operators),
        })
    }
}

impl std::fmt::Display for TraversalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.root)?;
        for step in &self.steps {
            step.fmt(f)?;
        }
        Ok(())
    }
}

fn static_steps(operators: &[TraversalOperator]) -> Vec<Step> {
    let mut steps = vec![];
    for operator in operators {
        let step = match operator {
            TraversalOperator::GetAttr(ident) => Step::Attr(ident.as_str().to_string()),
            TraversalOperator::Index(Expression::Number(number)) => {
                Step::Index(IndexKey::Number(number.clone()))
            }
            TraversalOperator::Index(Expression::String(string)) => {
                Step::Index(IndexKey::String(string.clone()))
            }
            TraversalOperator::LegacyIndex(index) => {
                Step::Index(IndexKey::Number(hcl::Number::from(*index)))
            }
            _ => break,
        };
        steps.push(step);
    }
    steps
}

/// Referenceable object at the start of a traversal
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    InputVariable(String),
    LocalValue(String),
    CountAttr(String),
    ForEachAttr(String),
    PathAttr(String),
    /// `terraform.<name>` or `tofu.<name>`
    WorkspaceAttr { root: String, name: String },
    SelfRef,
    Resource(ResourceAddr),
    ResourceInstance(ResourceAddr, IndexKey),
    ModuleCall(String),
    ModuleCallInstance(String, IndexKey),
    ModuleCallInstanceOutput {
        call: String,
        key: Option<IndexKey>,
        output: String,
    },
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::InputVariable(name) => write!(f, "var.{name}"),
            Subject::LocalValue(name) => write!(f, "local.{name}"),
            Subject::CountAttr(name) => write!(f, "count.{name}"),
            Subject::ForEachAttr(name) => write!(f, "each.{name}"),
            Subject::PathAttr(name) => write!(f, "path.{name}"),
            Subject::WorkspaceAttr { root, name } => write!(f, "{root}.{name}"),
            Subject::SelfRef => f.write_str("self"),
            Subject::Resource(addr) => addr.fmt(f),
            Subject::ResourceInstance(addr, key) => write!(f, "{addr}{key}"),
            Subject::ModuleCall(call) => write!(f, "module.{call}"),
            Subject::ModuleCallInstance(call, key) => write!(f, "module.{call}{key}"),
            Subject::ModuleCallInstanceOutput { call, key, output } => {
                write!(f, "module.{call}")?;
                if let Some(key) = key {
                    key.fmt(f)?;
                }
                write!(f, ".{output}")
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid reference {path}: {reason}")]
pub struct ReferenceError {
    path: String,
    reason: &'static str,
}

/// A parsed reference: the subject and whatever traversal follows it
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub subject: Subject,
    pub remaining: Vec<Step>,
}

impl Reference {
    pub fn parse(path: &TraversalPath) -> Result<Self, ReferenceError> {
        let error = |reason| ReferenceError {
            path: path.to_string(),
            reason,
        };
        let mut steps = path.steps.iter().cloned().peekable();
        let mut attr = |missing: &'static str| match steps.next() {
            Some(Step::Attr(name)) => Ok(name),
            _ => Err(error(missing)),
        };

        let subject = match path.root.as_str() {
            "var" => Subject::InputVariable(attr("variable name required")?),
            "local" => Subject::LocalValue(attr("local value name required")?),
            "count" => Subject::CountAttr(attr("count attribute required")?),
            "each" => Subject::ForEachAttr(attr("each attribute required")?),
            "path" => Subject::PathAttr(attr("path attribute required")?),
            "terraform" | "tofu" => Subject::WorkspaceAttr {
                root: path.root.clone(),
                name: attr("attribute name required")?,
            },
            "self" => Subject::SelfRef,
            "module" => {
                let call = attr("module call name required")?;
                let key = match steps.peek() {
                    Some(Step::Index(key)) => {
                        let key = key.clone();
                        steps.next();
                        Some(key)
                    }
                    _ => None,
                };
                match steps.peek() {
                    Some(Step::Attr(output)) => {
                        let output = output.clone();
                        steps.next();
                        Subject::ModuleCallInstanceOutput { call, key, output }
                    }
                    _ => match key {
                        Some(key) => Subject::ModuleCallInstance(call, key),
                        None => Subject::ModuleCall(call),
                    },
                }
            }
            "data" | "ephemeral" => {
                let mode = if path.root == "data" {
                    ResourceMode::Data
                } else {
                    ResourceMode::Ephemeral
                };
                let type_name = attr("resource type required")?;
                let name = attr("resource name required")?;
                resource_subject(ResourceAddr::new(mode, type_name, name), &mut steps)
            }
            type_name => {
                let name = attr("resource name required")?;
                resource_subject(
                    ResourceAddr::new(ResourceMode::Managed, type_name, name),
                    &mut steps,
                )
            }
        };

        Ok(Self {
            subject,
            remaining: steps.collect(),
        })
    }
}

fn resource_subject(
    addr: ResourceAddr,
    steps: &mut std::iter::Peekable<impl Iterator<Item = Step>>,
) -> Subject {
    if let Some(Step::Index(key)) = steps.peek() {
        let key = key.clone();
        steps.next();
        return Subject::ResourceInstance(addr, key);
    }
    Subject::Resource(addr)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Reference {
        let expr: hcl_edit::expr::Expression = src.parse().unwrap();
        let path = TraversalPath::from_expression(&expr.into()).unwrap();
        Reference::parse(&path).unwrap()
    }

    #[test]
    fn variable_with_index() {
        let reference = parse("var.list[1]");
        assert_eq!(reference.subject.to_string(), "var.list");
        assert_eq!(
            reference.remaining,
            vec![Step::Index(IndexKey::Number(hcl::Number::from(1u64)))]
        );
    }

    #[test]
    fn data_resource_instance() {
        let reference = parse(r#"data.template_file.foo[1].vars["baz"]"#);
        assert_eq!(reference.subject.to_string(), "data.template_file.foo[1]");
        assert_eq!(
            reference.remaining,
            vec![
                Step::Attr("vars".into()),
                Step::Index(IndexKey::String("baz".into()))
            ]
        );
    }

    #[test]
    fn module_output() {
        let reference = parse("module.foo.bar");
        assert_eq!(
            reference.subject,
            Subject::ModuleCallInstanceOutput {
                call: "foo".into(),
                key: None,
                output: "bar".into()
            }
        );
        assert_eq!(parse("module.foo").subject.to_string(), "module.foo");
        assert_eq!(parse(r#"module.foo["a"]"#).subject.to_string(), r#"module.foo["a"]"#);
    }

    #[test]
    fn managed_resource() {
        let reference = parse("aws_instance.web.id");
        assert_eq!(reference.subject.to_string(), "aws_instance.web");
        assert_eq!(reference.remaining, vec![Step::Attr("id".into())]);
    }

    #[test]
    fn incomplete_references_fail() {
        for src in ["var", "aws_instance", "data.aws_ami", "count"] {
            let expr: hcl_edit::expr::Expression = src.parse().unwrap();
            let path = TraversalPath::from_expression(&expr.into()).unwrap();
            assert!(Reference::parse(&path).is_err(), "{src} must not parse");
        }
    }

    #[test]
    fn dynamic_index_ends_path() {
        let expr: hcl_edit::expr::Expression = "var.map[var.key].name".parse().unwrap();
        let path = TraversalPath::from_expression(&expr.into()).unwrap();
        assert_eq!(path.to_string(), "var.map");
    }
}
