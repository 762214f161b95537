//! variable type constraints
use hcl::expr::FuncCall;
use hcl::{Expression, ObjectKey};
use indexmap::IndexMap;
use serde_json::{json, Value};

/// A parsed `type` argument
#[derive(Debug, Clone, PartialEq)]
pub enum TypeConstraint {
    Any,
    String,
    Number,
    Bool,
    List(Box<TypeConstraint>),
    Set(Box<TypeConstraint>),
    Map(Box<TypeConstraint>),
    Tuple(Vec<TypeConstraint>),
    Object(IndexMap<String, ObjectAttribute>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttribute {
    pub constraint: TypeConstraint,
    /// declared with `optional(...)`
    pub optional: bool,
}

impl TypeConstraint {
    pub fn parse(expression: &Expression) -> Result<Self, String> {
        match expression {
            Expression::Variable(keyword) => match keyword.as_str() {
                "any" => Ok(Self::Any),
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "bool" => Ok(Self::Bool),
                other => Err(format!("the keyword {other:?} is not a valid type")),
            },
            Expression::FuncCall(call) => Self::parse_call(call),
            Expression::String(_) | Expression::TemplateExpr(_) => {
                Err("quoted type constraints are no longer supported".to_string())
            }
            _ => Err("a type constraint must be a keyword or a type constructor".to_string()),
        }
    }

    fn parse_call(call: &FuncCall) -> Result<Self, String> {
        let name = call.name.to_string();
        let single = || match call.args.as_slice() {
            [arg] => Ok(arg),
            _ => Err(format!("{name}(...) takes exactly one argument")),
        };

        match name.as_str() {
            "list" => Ok(Self::List(Box::new(Self::parse(single()?)?))),
            "set" => Ok(Self::Set(Box::new(Self::parse(single()?)?))),
            "map" => Ok(Self::Map(Box::new(Self::parse(single()?)?))),
            "tuple" => match single()? {
                Expression::Array(elements) => Ok(Self::Tuple(
                    elements.iter().map(Self::parse).collect::<Result<_, _>>()?,
                )),
                _ => Err("tuple(...) requires a list of element types".to_string()),
            },
            "object" => match single()? {
                Expression::Object(object) => {
                    let mut attributes = IndexMap::new();
                    for (key, value) in object {
                        attributes.insert(object_key(key)?, Self::object_attribute(value)?);
                    }
                    Ok(Self::Object(attributes))
                }
                _ => Err("object(...) requires an object of attribute types".to_string()),
            },
            "optional" => Err("optional(...) is only valid for object attributes".to_string()),
            other => Err(format!("{other:?} is not a type constructor")),
        }
    }

    fn object_attribute(expression: &Expression) -> Result<ObjectAttribute, String> {
        if let Expression::FuncCall(call) = expression {
            if call.name.to_string() == "optional" {
                // the default is only applied at evaluation time
                return match call.args.as_slice() {
                    [constraint] | [constraint, _] => Ok(ObjectAttribute {
                        constraint: Self::parse(constraint)?,
                        optional: true,
                    }),
                    _ => Err("optional(...) takes a type and an optional default".to_string()),
                };
            }
        }
        Ok(ObjectAttribute {
            constraint: Self::parse(expression)?,
            optional: false,
        })
    }

    /// JSON form of the type, `None` for `any`
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Any => None,
            _ => Some(self.type_json()),
        }
    }

    fn type_json(&self) -> Value {
        match self {
            Self::Any => json!("dynamic"),
            Self::String => json!("string"),
            Self::Number => json!("number"),
            Self::Bool => json!("bool"),
            Self::List(element) => json!(["list", element.type_json()]),
            Self::Set(element) => json!(["set", element.type_json()]),
            Self::Map(element) => json!(["map", element.type_json()]),
            Self::Tuple(elements) => {
                let elements: Vec<Value> = elements.iter().map(Self::type_json).collect();
                json!(["tuple", elements])
            }
            Self::Object(attributes) => {
                let types: serde_json::Map<String, Value> = attributes
                    .iter()
                    .map(|(name, attribute)| (name.clone(), attribute.constraint.type_json()))
                    .collect();
                let mut optional: Vec<&String> = attributes
                    .iter()
                    .filter(|(_, attribute)| attribute.optional)
                    .map(|(name, _)| name)
                    .collect();
                optional.sort();

                if optional.is_empty() {
                    json!(["object", types])
                } else {
                    json!(["object", types, optional])
                }
            }
        }
    }
}

fn object_key(key: &ObjectKey) -> Result<String, String> {
    match key {
        ObjectKey::Identifier(identifier) => Ok(identifier.to_string()),
        ObjectKey::Expression(Expression::String(name)) => Ok(name.clone()),
        ObjectKey::Expression(Expression::Variable(name)) => Ok(name.to_string()),
        _ => Err("object attribute names must be static".to_string()),
    }
}
