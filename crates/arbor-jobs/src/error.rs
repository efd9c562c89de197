// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::types::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job already registered: {0}")]
	DuplicateJob(String),

	#[error("Job not found: {0}")]
	JobNotFound(String),

	#[error("Job execution not found: {0}")]
	ExecutionNotFound(String),

	#[error("Invalid parameter '{name}': {message}")]
	InvalidParameter { name: String, message: String },

	#[error("Job execution {execution_id} cannot move from {from} to {to}")]
	InvalidTransition {
		execution_id: String,
		from: JobStatus,
		to: JobStatus,
	},

	#[error("Job execution {execution_id} cannot be executed in status {status}")]
	InvalidState {
		execution_id: String,
		status: JobStatus,
	},

	#[error("Job execution {execution_id} is not running (status: {status})")]
	NotRunning {
		execution_id: String,
		status: JobStatus,
	},

	#[error("Stop requested for job execution {0}")]
	StopRequested(String),

	#[error("Job execution already running: {0}")]
	AlreadyRunning(String),

	#[error("Job execution {execution_id} is running with no attached executor; discard or re-run it")]
	Restart { execution_id: String },

	#[error("Job failed: {0}")]
	Failed(String),

	#[error("Codec error: {0}")]
	Codec(String),

	#[error("Worker error: {0}")]
	Worker(String),

	#[error("Model error: {0}")]
	Model(#[from] arbor_tree::ModelError),

	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl JobError {
	pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
		JobError::InvalidParameter {
			name: name.into(),
			message: message.into(),
		}
	}

	/// True when the error signals an orphaned running execution rather than a failure.
	pub fn is_restart(&self) -> bool {
		matches!(self, JobError::Restart { .. })
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
