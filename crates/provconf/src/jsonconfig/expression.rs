//! unevaluated expressions in the export format
use crate::addrs::{Reference, Subject, TraversalPath};
use crate::schema::{NestingMode, SchemaBlock};
use crate::visit::VisitTraversals;
use hcl::{Block, Body, Expression, Object, ObjectKey, Structure, Traversal};
use serde::Serialize;
use std::collections::BTreeMap;

/// An expression: its value if it is constant, otherwise the objects it references
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct JsonExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant_value: Option<serde_json::Value>,
    /// every reference unwrapped step by step, from the full traversal down to the referenced
    /// object, so consumers can match with plain string comparison
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl JsonExpression {
    pub fn is_empty(&self) -> bool {
        self.constant_value.is_none() && self.references.is_empty()
    }

    /// `None` when empty
    pub fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

/// Content of a block: attribute expressions and nested blocks
pub type Expressions = BTreeMap<String, ExpressionTree>;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ExpressionTree {
    Expression(JsonExpression),
    /// `single` and `group` nested blocks
    Block(Expressions),
    /// `list` and `set` nested blocks
    Blocks(Vec<Expressions>),
    /// `map` nested blocks, keyed by label
    Map(BTreeMap<String, Expressions>),
}

pub fn marshal_expression(expression: Option<&Expression>) -> JsonExpression {
    let Some(expression) = expression else {
        return JsonExpression::default();
    };

    let mut traversals = vec![];
    expression.visit_traversals(&mut |traversal: &Traversal| traversals.push(traversal.clone()));

    let mut json = JsonExpression::default();
    if traversals.is_empty() {
        json.constant_value = constant_value(expression);
    }

    for traversal in &traversals {
        let Some(path) = TraversalPath::from_traversal(traversal) else {
            continue;
        };
        let reference = match Reference::parse(&path) {
            Ok(reference) => reference,
            Err(err) => {
                tracing::trace!(%err, "not a reference");
                continue;
            }
        };
        json.references.extend(unwrap_reference(&reference));
    }

    json
}

/// The full reference first, then one entry per dropped trailing step
fn unwrap_reference(reference: &Reference) -> Vec<String> {
    let subject = reference.subject.to_string();
    let mut unwrapped = vec![];

    for len in (1..=reference.remaining.len()).rev() {
        let mut string = subject.clone();
        for step in &reference.remaining[..len] {
            string.push_str(&step.to_string());
        }
        unwrapped.push(string);
    }
    unwrapped.push(subject);

    match &reference.subject {
        Subject::ResourceInstance(addr, _) => unwrapped.push(addr.to_string()),
        Subject::ModuleCallInstance(call, _) => unwrapped.push(format!("module.{call}")),
        Subject::ModuleCallInstanceOutput { call, .. } => unwrapped.push(format!("module.{call}")),
        _ => {}
    }

    unwrapped
}

/// Value of an expression that folds without any variables or functions
fn constant_value(expression: &Expression) -> Option<serde_json::Value> {
    use hcl::eval::Evaluate;

    let value = match expression.evaluate(&hcl::eval::Context::new()) {
        Ok(value) => value,
        Err(err) => {
            tracing::trace!(%err, "expression is not constant");
            return None;
        }
    };
    match serde_json::to_value(&value) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::debug!(%err, "constant value not representable as json");
            None
        }
    }
}

/// Marshal the content of `body` known to `schema`
///
/// Anything the schema does not declare is left out, `dynamic` blocks included.
pub fn marshal_expressions(body: &Body, schema: &SchemaBlock) -> Expressions {
    let body = fix_up_block_attributes(body, schema);
    let mut expressions = Expressions::new();

    for attribute in body.attributes() {
        let name = attribute.key.as_str();
        if !schema.attributes.contains_key(name) {
            continue;
        }
        expressions.insert(
            name.to_string(),
            ExpressionTree::Expression(marshal_expression(Some(&attribute.expr))),
        );
    }

    for block in body.blocks() {
        let name = block.identifier.as_str();
        let Some(nested) = schema.block_types.get(name) else {
            continue;
        };
        let content = marshal_expressions(&block.body, &nested.block);

        match nested.nesting_mode {
            NestingMode::Single | NestingMode::Group => {
                expressions.insert(name.to_string(), ExpressionTree::Block(content));
            }
            NestingMode::List | NestingMode::Set => {
                let entry = expressions
                    .entry(name.to_string())
                    .or_insert_with(|| ExpressionTree::Blocks(vec![]));
                if let ExpressionTree::Blocks(blocks) = entry {
                    blocks.push(content);
                }
            }
            NestingMode::Map => {
                let Some(label) = block.labels.first() else {
                    tracing::debug!(block = name, "map block without label, skipping");
                    continue;
                };
                let entry = expressions
                    .entry(name.to_string())
                    .or_insert_with(|| ExpressionTree::Map(BTreeMap::new()));
                if let ExpressionTree::Map(map) = entry {
                    map.insert(label.as_str().to_string(), content);
                }
            }
        }
    }

    expressions
}

/// Rewrite blocks written for list or set of object attributes into one attribute
///
/// Legacy providers declare some nested blocks as attributes, configurations still use block
/// syntax for them. The blocks become a tuple of objects.
fn fix_up_block_attributes(body: &Body, schema: &SchemaBlock) -> Body {
    let is_block_attr = |block: &Block| {
        schema
            .attributes
            .get(block.identifier.as_str())
            .is_some_and(|attribute| attribute.is_object_collection())
            && !body
                .attributes()
                .any(|attribute| attribute.key.as_str() == block.identifier.as_str())
    };

    if !body.blocks().any(|block| is_block_attr(block)) {
        return body.clone();
    }

    let mut folded: Vec<(String, Vec<Expression>)> = vec![];
    let mut structures: Vec<Structure> = vec![];
    for structure in body {
        match structure {
            Structure::Block(block) if is_block_attr(block) => {
                let name = block.identifier.as_str();
                let object = Expression::Object(block_object(&block.body));
                match folded.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, elements)) => elements.push(object),
                    None => folded.push((name.to_string(), vec![object])),
                }
            }
            other => structures.push(other.clone()),
        }
    }

    structures.extend(
        folded
            .into_iter()
            .map(|(name, elements)| hcl::Attribute::new(name, Expression::Array(elements)).into()),
    );
    structures.into_iter().collect()
}

fn block_object(body: &Body) -> Object<ObjectKey, Expression> {
    let mut object = Object::new();
    for structure in body {
        match structure {
            Structure::Attribute(attribute) => {
                object.insert(
                    ObjectKey::Identifier(attribute.key.clone()),
                    attribute.expr.clone(),
                );
            }
            Structure::Block(block) => {
                let key = ObjectKey::Identifier(block.identifier.clone());
                let nested = Expression::Object(block_object(&block.body));
                match object.get_mut(&key) {
                    Some(Expression::Array(elements)) => elements.push(nested),
                    _ => {
                        object.insert(key, Expression::Array(vec![nested]));
                    }
                }
            }
        }
    }
    object
}
