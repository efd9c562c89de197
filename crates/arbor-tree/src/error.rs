// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
	#[error("Unexpected character '{ch}' at position {position}")]
	UnexpectedCharacter { ch: char, position: usize },

	#[error("Unexpected token '{found}' at position {position}")]
	UnexpectedToken { found: String, position: usize },

	#[error("Unexpected end of expression")]
	UnexpectedEnd,

	#[error("Invalid number literal: {0}")]
	InvalidNumber(String),

	#[error("Unknown function: {0}")]
	UnknownFunction(String),

	#[error("Function {function} expects {expected} argument(s), got {found}")]
	Arity {
		function: String,
		expected: usize,
		found: usize,
	},

	#[error("Unknown variable: {0}")]
	UnknownVariable(String),

	#[error("Expression '{0}' did not evaluate to a finite number")]
	NotFinite(String),

	#[error("Expression nests deeper than {limit} levels")]
	TooDeep { limit: usize },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
	#[error("Invalid expression for {context}: {source}")]
	Expression {
		context: String,
		#[source]
		source: ExpressionError,
	},

	#[error("Node '{0}' has no outgoing edges")]
	EmptyNode(String),

	#[error("Duplicate variable definition: {0}")]
	DuplicateVariable(String),

	#[error("Invalid probability {value} on edge '{edge}' of node '{node}'")]
	InvalidProbability {
		node: String,
		edge: String,
		value: f64,
	},

	#[error("Probabilities of chance node '{node}' sum to {sum}, expected 1")]
	ProbabilitySum { node: String, sum: f64 },
}

impl ModelError {
	pub(crate) fn expression(context: impl Into<String>, source: ExpressionError) -> Self {
		ModelError::Expression {
			context: context.into(),
			source,
		}
	}
}
