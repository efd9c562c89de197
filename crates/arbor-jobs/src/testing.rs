// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helpers for exercising the engine in tests.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use arbor_tree::{DecisionModel, Edge, Expression, Node};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::job::{Job, JobOutcome};
use crate::listener::JobExecutionListener;
use crate::parameters::JobParameters;
use crate::types::JobExecution;

/// One decision between taking a payoff of `x` and a fixed payoff of -1.
pub fn linear_model() -> DecisionModel {
	DecisionModel::new(Node::Decision {
		name: "invest".to_string(),
		edges: vec![
			Edge::new("yes", Expression::parse("x").unwrap(), Node::terminal("done")),
			Edge::new("no", Expression::constant(-1.0).unwrap(), Node::terminal("skipped")),
		],
	})
	.with_variable("x", Expression::constant(0.0).unwrap())
}

/// Job that returns a fixed result, or fails with a fixed message.
pub struct StaticJob {
	name: String,
	result: Value,
	failure: Option<String>,
}

impl StaticJob {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			result: json!({}),
			failure: None,
		}
	}

	pub fn with_result(mut self, result: Value) -> Self {
		self.result = result;
		self
	}

	pub fn failing(mut self, message: impl Into<String>) -> Self {
		self.failure = Some(message.into());
		self
	}
}

#[async_trait]
impl Job for StaticJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn description(&self) -> &str {
		"Returns a fixed result"
	}

	fn create_job_parameters(&self, values: &Value) -> Result<JobParameters> {
		JobParameters::from_value(self.name.clone(), values)
	}

	async fn execute(
		&self,
		_ctx: &JobContext,
		_parameters: &JobParameters,
		_snapshot: &DecisionModel,
	) -> Result<JobOutcome> {
		match &self.failure {
			Some(message) => Err(JobError::Failed(message.clone())),
			None => Ok(JobOutcome::Completed(self.result.clone())),
		}
	}
}

/// Job that walks `steps` checkpoints, sleeping between them, and honours stop requests.
pub struct SteppingJob {
	name: String,
	steps: u64,
	delay: Duration,
}

impl SteppingJob {
	pub fn new(name: impl Into<String>, steps: u64, delay: Duration) -> Self {
		Self {
			name: name.into(),
			steps,
			delay,
		}
	}
}

#[async_trait]
impl Job for SteppingJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn description(&self) -> &str {
		"Sleeps through a fixed number of checkpoints"
	}

	fn create_job_parameters(&self, values: &Value) -> Result<JobParameters> {
		JobParameters::from_value(self.name.clone(), values)
	}

	async fn execute(
		&self,
		ctx: &JobContext,
		_parameters: &JobParameters,
		_snapshot: &DecisionModel,
	) -> Result<JobOutcome> {
		for step in 1..=self.steps {
			tokio::time::sleep(self.delay).await;
			ctx.report_progress(step, self.steps).await?;
			if step < self.steps && ctx.should_stop().await? {
				return Ok(JobOutcome::Stopped(json!({ "completedSteps": step })));
			}
		}
		Ok(JobOutcome::Completed(json!({ "completedSteps": self.steps })))
	}
}

/// Listener that records `event:execution_id` strings in arrival order.
#[derive(Default)]
pub struct RecordingListener {
	events: Mutex<Vec<String>>,
}

impl RecordingListener {
	pub fn events(&self) -> Vec<String> {
		self.events
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	fn record(&self, event: &str, execution: &JobExecution) {
		self.events
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(format!("{event}:{}", execution.id));
	}
}

impl JobExecutionListener for RecordingListener {
	fn before_job(&self, execution: &JobExecution) {
		self.record("beforeJob", execution);
	}

	fn after_job(&self, execution: &JobExecution) {
		self.record("afterJob", execution);
	}
}
