// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::expression::{Expression, Scope};

/// A named model variable whose value is computed from an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
	pub name: String,
	pub value: Expression,
}

/// Snapshot of a decision model.
///
/// Variables are evaluated in declaration order, so a definition may refer to
/// any variable declared before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionModel {
	#[serde(default)]
	pub variables: Vec<VariableDefinition>,
	pub root: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
	Decision { name: String, edges: Vec<Edge> },
	Chance { name: String, edges: Vec<Edge> },
	Terminal { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
	pub name: String,
	#[serde(default = "zero_payoff")]
	pub payoff: Expression,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub probability: Option<Expression>,
	pub child: Node,
}

fn zero_payoff() -> Expression {
	Expression::zero()
}

impl Edge {
	pub fn new(name: impl Into<String>, payoff: Expression, child: Node) -> Self {
		Self {
			name: name.into(),
			payoff,
			probability: None,
			child,
		}
	}

	pub fn with_probability(mut self, probability: Expression) -> Self {
		self.probability = Some(probability);
		self
	}
}

impl Node {
	pub fn terminal(name: impl Into<String>) -> Self {
		Node::Terminal { name: name.into() }
	}

	pub fn name(&self) -> &str {
		match self {
			Node::Decision { name, .. } | Node::Chance { name, .. } | Node::Terminal { name } => name,
		}
	}

	pub fn edges(&self) -> &[Edge] {
		match self {
			Node::Decision { edges, .. } | Node::Chance { edges, .. } => edges,
			Node::Terminal { .. } => &[],
		}
	}
}

impl DecisionModel {
	pub fn new(root: Node) -> Self {
		Self {
			variables: Vec::new(),
			root,
		}
	}

	pub fn with_variable(mut self, name: impl Into<String>, value: Expression) -> Self {
		self.variables.push(VariableDefinition {
			name: name.into(),
			value,
		});
		self
	}

	/// Checks structural constraints that do not depend on variable values.
	pub fn validate(&self) -> Result<(), ModelError> {
		let mut seen = HashSet::new();
		for def in &self.variables {
			if !seen.insert(def.name.as_str()) {
				return Err(ModelError::DuplicateVariable(def.name.clone()));
			}
		}
		validate_node(&self.root)
	}

	/// Builds the evaluation scope. Bindings in `overrides` take precedence
	/// over model definitions of the same name.
	pub fn scope(&self, overrides: &Scope) -> Result<Scope, ModelError> {
		let mut scope = overrides.clone();
		for def in &self.variables {
			if overrides.contains(&def.name) {
				continue;
			}
			let value = def
				.value
				.evaluate(&scope)
				.map_err(|e| ModelError::expression(format!("variable '{}'", def.name), e))?;
			scope.set(def.name.clone(), value);
		}
		Ok(scope)
	}
}

fn validate_node(node: &Node) -> Result<(), ModelError> {
	match node {
		Node::Terminal { .. } => Ok(()),
		Node::Decision { name, edges } | Node::Chance { name, edges } => {
			if edges.is_empty() {
				return Err(ModelError::EmptyNode(name.clone()));
			}
			edges.iter().try_for_each(|edge| validate_node(&edge.child))
		}
	}
}
