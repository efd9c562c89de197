// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Objective rules over decision models.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::expression::Scope;
use crate::model::{DecisionModel, Edge, Node};

const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveRule {
	#[default]
	ExpectedValueMaximization,
	ExpectedValueMinimization,
}

impl ObjectiveRule {
	pub fn as_str(&self) -> &'static str {
		match self {
			ObjectiveRule::ExpectedValueMaximization => "expected-value-maximization",
			ObjectiveRule::ExpectedValueMinimization => "expected-value-minimization",
		}
	}

	fn prefers(&self, candidate: f64, current: f64) -> bool {
		match self {
			ObjectiveRule::ExpectedValueMaximization => candidate > current,
			ObjectiveRule::ExpectedValueMinimization => candidate < current,
		}
	}

	/// Computes the objective value of `model` with `overrides` bound, and the
	/// policy that achieves it.
	pub fn evaluate(&self, model: &DecisionModel, overrides: &Scope) -> Result<Evaluation, ModelError> {
		let scope = model.scope(overrides)?;
		let (payoff, policy) = self.node_value(&model.root, &scope)?;
		Ok(Evaluation { payoff, policy })
	}

	fn edge_value(
		&self,
		node: &str,
		edge: &Edge,
		scope: &Scope,
	) -> Result<(f64, Vec<PolicyDecision>), ModelError> {
		let payoff = edge
			.payoff
			.evaluate(scope)
			.map_err(|e| ModelError::expression(format!("payoff of '{node}/{}'", edge.name), e))?;
		let (child_value, policy) = self.node_value(&edge.child, scope)?;
		Ok((payoff + child_value, policy))
	}

	fn node_value(&self, node: &Node, scope: &Scope) -> Result<(f64, Vec<PolicyDecision>), ModelError> {
		match node {
			Node::Terminal { .. } => Ok((0.0, Vec::new())),
			Node::Decision { name, edges } => {
				let mut best: Option<(f64, &Edge, Vec<PolicyDecision>)> = None;
				for edge in edges {
					let (value, policy) = self.edge_value(name, edge, scope)?;
					let better = match &best {
						None => true,
						Some((current, _, _)) => self.prefers(value, *current),
					};
					if better {
						best = Some((value, edge, policy));
					}
				}
				let (value, edge, sub_policy) = best.ok_or_else(|| ModelError::EmptyNode(name.clone()))?;
				let mut policy = vec![PolicyDecision {
					node: name.clone(),
					edge: edge.name.clone(),
				}];
				policy.extend(sub_policy);
				Ok((value, policy))
			}
			Node::Chance { name, edges } => {
				if edges.is_empty() {
					return Err(ModelError::EmptyNode(name.clone()));
				}
				let mut total = 0.0;
				let mut sum = 0.0;
				let mut policy = Vec::new();
				for edge in edges {
					let probability = match &edge.probability {
						Some(expr) => expr.evaluate(scope).map_err(|e| {
							ModelError::expression(format!("probability of '{name}/{}'", edge.name), e)
						})?,
						None => 0.0,
					};
					if !(0.0..=1.0 + PROBABILITY_TOLERANCE).contains(&probability) {
						return Err(ModelError::InvalidProbability {
							node: name.clone(),
							edge: edge.name.clone(),
							value: probability,
						});
					}
					let (value, sub_policy) = self.edge_value(name, edge, scope)?;
					total += probability * value;
					sum += probability;
					policy.extend(sub_policy);
				}
				if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
					return Err(ModelError::ProbabilitySum {
						node: name.clone(),
						sum,
					});
				}
				Ok((total, policy))
			}
		}
	}
}

impl std::fmt::Display for ObjectiveRule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ObjectiveRule {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"expected-value-maximization" | "max" => Ok(ObjectiveRule::ExpectedValueMaximization),
			"expected-value-minimization" | "min" => Ok(ObjectiveRule::ExpectedValueMinimization),
			_ => Err(format!("unknown objective rule: {s}")),
		}
	}
}

/// The edge chosen at one decision node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
	pub node: String,
	pub edge: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
	pub payoff: f64,
	pub policy: Vec<PolicyDecision>,
}
