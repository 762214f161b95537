use super::Visit;
use hcl::{
    template::{Directive, Element},
    Body, Expression, Identifier, ObjectKey, Operation, Structure, Template, Traversal,
    TraversalOperator,
};

/// Recursively visit all root [hcl::Traversal]s (traversals starting at a variable)
///
/// Traversals rooted at the iterator variables of `for` expressions and directives are local to
/// that expression and are not visited.
pub trait VisitTraversals {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>);
}

impl VisitTraversals for Body {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>) {
        for structure in self {
            match structure {
                Structure::Attribute(attr) => attr.expr.visit_traversals(visitor),
                Structure::Block(block) => block.body.visit_traversals(visitor),
            }
        }
    }
}

impl VisitTraversals for Expression {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>) {
        match self {
            Expression::Variable(variable) => {
                // a standalone variable is a traversal with no operators...kind of
                let traversal = Traversal::new(
                    Expression::Variable(variable.clone()),
                    Vec::<TraversalOperator>::new(),
                );
                visitor.visit(&traversal);
            }
            Expression::Traversal(traversal) => {
                if let Expression::Variable(_) = &traversal.expr {
                    visitor.visit(traversal);
                } else {
                    traversal.expr.visit_traversals(visitor);
                }
                for operator in &traversal.operators {
                    if let TraversalOperator::Index(index) = operator {
                        index.visit_traversals(visitor);
                    }
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_traversals(visitor);
                }
            }
            Expression::Object(object) => {
                for (key, value) in object {
                    if let ObjectKey::Expression(key) = key {
                        key.visit_traversals(visitor);
                    }
                    value.visit_traversals(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                match Template::from_expr(template_expr) {
                    Ok(template) => template.visit_traversals(visitor),
                    Err(err) => tracing::debug!(%err, "template did not parse, skipping"),
                }
            }
            Expression::FuncCall(func_call) => {
                for arg in &func_call.args {
                    arg.visit_traversals(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_traversals(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_traversals(visitor);
                cond.true_expr.visit_traversals(visitor);
                cond.false_expr.visit_traversals(visitor);
            }
            Expression::Operation(operation) => match operation.as_ref() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_traversals(visitor);
                    binop.rhs_expr.visit_traversals(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_traversals(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr.collection_expr.visit_traversals(visitor);

                let locals = [forexpr.key_var.as_ref(), Some(&forexpr.value_var)];
                let mut scoped = |traversal: &Traversal| {
                    if !is_rooted_at(traversal, &locals) {
                        visitor.visit(traversal);
                    }
                };
                forexpr
                    .key_expr
                    .iter()
                    .for_each(|e| e.visit_traversals(&mut scoped));
                forexpr.value_expr.visit_traversals(&mut scoped);
                forexpr
                    .cond_expr
                    .iter()
                    .for_each(|e| e.visit_traversals(&mut scoped));
            }
            _ => {}
        }
    }
}

impl VisitTraversals for Template {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>) {
        for element in self.elements() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_traversals(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_traversals(visitor);
                        ifdir.true_template.visit_traversals(visitor);
                        ifdir
                            .false_template
                            .iter()
                            .for_each(|t| t.visit_traversals(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.collection_expr.visit_traversals(visitor);

                        let locals = [fordir.key_var.as_ref(), Some(&fordir.value_var)];
                        let mut scoped = |traversal: &Traversal| {
                            if !is_rooted_at(traversal, &locals) {
                                visitor.visit(traversal);
                            }
                        };
                        fordir.template.visit_traversals(&mut scoped);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

fn is_rooted_at(traversal: &Traversal, locals: &[Option<&Identifier>]) -> bool {
    let Expression::Variable(var) = &traversal.expr else {
        return false;
    };
    locals
        .iter()
        .flatten()
        .any(|local| local.as_str() == var.as_str())
}
