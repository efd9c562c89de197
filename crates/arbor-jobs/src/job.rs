// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use arbor_tree::DecisionModel;
use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::Result;
use crate::parameters::JobParameters;

/// How a job body ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
	Completed(serde_json::Value),
	/// The job observed a stop request and returned what it had computed so far.
	Stopped(serde_json::Value),
}

#[async_trait]
pub trait Job: Send + Sync {
	fn name(&self) -> &str;
	fn description(&self) -> &str;

	/// Validate and normalize caller input into parameters for this job.
	fn create_job_parameters(&self, values: &serde_json::Value) -> Result<JobParameters>;

	async fn execute(
		&self,
		ctx: &JobContext,
		parameters: &JobParameters,
		snapshot: &DecisionModel,
	) -> Result<JobOutcome>;
}
