// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decision tree model for Arbor.
//!
//! This crate provides the pieces the job engine evaluates but does not own:
//! - A small arithmetic expression language ([`Expression`]) whose values are
//!   serialized as source text and re-parsed on load
//! - The decision model snapshot ([`DecisionModel`]) made of decision, chance
//!   and terminal nodes
//! - Objective rules ([`ObjectiveRule`]) that compute the payoff and the
//!   chosen policy for a model under a set of variable bindings

pub mod error;
pub mod expression;
pub mod model;
pub mod objective;

pub use error::{ExpressionError, ModelError};
pub use expression::{Expression, Scope, MAX_DEPTH};
pub use model::{DecisionModel, Edge, Node, VariableDefinition};
pub use objective::{Evaluation, ObjectiveRule, PolicyDecision};
