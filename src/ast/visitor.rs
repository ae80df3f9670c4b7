// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Visitor pattern for AST traversal

use super::expression::{Expression, Node};

/// Trait for visiting AST nodes
///
/// Override the hooks you need; `visit_expression` walks children by default.
pub trait Visitor: Sized {
    /// Visit an expression node
    fn visit_expression(&mut self, node: &Node) {
        walk_expression(self, node)
    }

    /// Called for every identifier, including lambda parameters in use
    fn visit_identifier(&mut self, _node: &Node, _name: &str) {}

    /// Called for `callee(args)` before the children are walked
    fn visit_call(&mut self, _node: &Node, _callee: &Node, _arguments: &[Node]) {}

    /// Called when entering a lambda body
    fn enter_lambda(&mut self, _params: &[String]) {}

    /// Called when leaving a lambda body
    fn leave_lambda(&mut self, _params: &[String]) {}
}

/// Default implementation of walking an expression tree
pub fn walk_expression<V: Visitor>(visitor: &mut V, node: &Node) {
    match &node.value {
        Expression::Literal(_) => {}
        Expression::Identifier(name) => visitor.visit_identifier(node, name),
        Expression::Array(items) => {
            for item in items {
                visitor.visit_expression(item);
            }
        }
        Expression::Object(entries) => {
            for (_, value) in entries {
                visitor.visit_expression(value);
            }
        }
        Expression::Member { object, .. } => visitor.visit_expression(object),
        Expression::Index { object, index, .. } => {
            visitor.visit_expression(object);
            visitor.visit_expression(index);
        }
        Expression::Call {
            callee, arguments, ..
        } => {
            visitor.visit_call(node, callee, arguments);
            visitor.visit_expression(callee);
            for argument in arguments {
                visitor.visit_expression(argument);
            }
        }
        Expression::Unary { operand, .. } => visitor.visit_expression(operand),
        Expression::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        Expression::Conditional {
            test,
            consequent,
            alternate,
        } => {
            visitor.visit_expression(test);
            visitor.visit_expression(consequent);
            visitor.visit_expression(alternate);
        }
        Expression::Lambda { params, body } => {
            visitor.enter_lambda(params);
            visitor.visit_expression(body);
            visitor.leave_lambda(params);
        }
        Expression::Assign { target, value } => {
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
    }
}
