// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::parameters::JobParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	New,
	Running,
	Finished,
	Failed,
	Stopped,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::New => "new",
			JobStatus::Running => "running",
			JobStatus::Finished => "finished",
			JobStatus::Failed => "failed",
			JobStatus::Stopped => "stopped",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped
		)
	}

	/// Whether `next` is a legal successor of this status.
	///
	/// NEW -> RUNNING is the only way in, so a second start of the same
	/// execution is refused.
	pub fn can_transition_to(&self, next: JobStatus) -> bool {
		matches!(
			(self, next),
			(JobStatus::New, JobStatus::Running)
				| (
					JobStatus::Running,
					JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped
				)
		)
	}
}

impl std::fmt::Display for JobStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"new" => Ok(JobStatus::New),
			"running" => Ok(JobStatus::Running),
			"finished" => Ok(JobStatus::Finished),
			"failed" => Ok(JobStatus::Failed),
			"stopped" => Ok(JobStatus::Stopped),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

/// Out-of-band control signal attached to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobExecutionFlag {
	#[default]
	None,
	Stop,
}

impl JobExecutionFlag {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobExecutionFlag::None => "none",
			JobExecutionFlag::Stop => "stop",
		}
	}
}

impl std::fmt::Display for JobExecutionFlag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for JobExecutionFlag {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"none" => Ok(JobExecutionFlag::None),
			"stop" => Ok(JobExecutionFlag::Stop),
			_ => Err(format!("unknown job execution flag: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobProgress {
	pub current: u64,
	pub total: u64,
}

impl JobProgress {
	pub fn new(current: u64, total: u64) -> Self {
		Self {
			current: current.min(total),
			total,
		}
	}

	/// Completed fraction in `[0, 1]`; zero while the total is unknown.
	pub fn fraction(&self) -> f64 {
		if self.total == 0 {
			return 0.0;
		}
		(self.current as f64 / self.total as f64).clamp(0.0, 1.0)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
	pub id: String,
	pub job_name: String,
	pub parameters: JobParameters,
	pub status: JobStatus,
	pub progress: JobProgress,
	#[serde(default)]
	pub flag: JobExecutionFlag,
	pub create_time: DateTime<Utc>,
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	pub result: Option<serde_json::Value>,
	pub error: Option<String>,
}

impl JobExecution {
	pub fn new(job_name: impl Into<String>, parameters: JobParameters) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			job_name: job_name.into(),
			parameters,
			status: JobStatus::New,
			progress: JobProgress::default(),
			flag: JobExecutionFlag::None,
			create_time: Utc::now(),
			start_time: None,
			end_time: None,
			result: None,
			error: None,
		}
	}

	pub fn is_running(&self) -> bool {
		self.status == JobStatus::Running
	}

	pub fn progress_view(&self) -> JobExecutionProgress {
		JobExecutionProgress {
			status: self.status,
			progress: self.progress,
		}
	}

	/// Apply a partial update, enforcing the status state machine.
	///
	/// Updates without a status (progress writes) are accepted only while the
	/// execution is not terminal. Terminal executions are immutable, and a
	/// FINISHED update is refused while a stop is flagged so the caller can
	/// record STOPPED instead.
	pub fn apply(&mut self, update: JobExecutionUpdate) -> Result<()> {
		let next = update.status.unwrap_or(self.status);
		let allowed = match update.status {
			Some(next) => self.status.can_transition_to(next),
			None => !self.status.is_terminal(),
		};
		if !allowed {
			return Err(JobError::InvalidTransition {
				execution_id: self.id.clone(),
				from: self.status,
				to: next,
			});
		}
		if next == JobStatus::Finished && self.flag == JobExecutionFlag::Stop {
			return Err(JobError::StopRequested(self.id.clone()));
		}

		self.status = next;
		if let Some(progress) = update.progress {
			self.progress = progress;
		}
		if update.start_time.is_some() {
			self.start_time = update.start_time;
		}
		if update.end_time.is_some() {
			self.end_time = update.end_time;
		}
		if update.result.is_some() {
			self.result = update.result;
		}
		if update.error.is_some() {
			self.error = update.error;
		}
		Ok(())
	}
}

/// Cheap status and progress view for polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionProgress {
	pub status: JobStatus,
	pub progress: JobProgress,
}

impl JobExecutionProgress {
	pub fn fraction(&self) -> f64 {
		self.progress.fraction()
	}
}

/// Partial update of a stored execution. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobExecutionUpdate {
	pub status: Option<JobStatus>,
	pub progress: Option<JobProgress>,
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	pub result: Option<serde_json::Value>,
	pub error: Option<String>,
}

impl JobExecutionUpdate {
	pub fn status(status: JobStatus) -> Self {
		Self {
			status: Some(status),
			..Default::default()
		}
	}

	pub fn progress(progress: JobProgress) -> Self {
		Self {
			progress: Some(progress),
			..Default::default()
		}
	}

	pub fn with_progress(mut self, progress: JobProgress) -> Self {
		self.progress = Some(progress);
		self
	}

	pub fn with_start_time(mut self, at: DateTime<Utc>) -> Self {
		self.start_time = Some(at);
		self
	}

	pub fn with_end_time(mut self, at: DateTime<Utc>) -> Self {
		self.end_time = Some(at);
		self
	}

	pub fn with_result(mut self, result: serde_json::Value) -> Self {
		self.result = Some(result);
		self
	}

	pub fn with_error(mut self, error: impl Into<String>) -> Self {
		self.error = Some(error.into());
		self
	}
}

/// Lifecycle notification for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "execution", rename_all = "camelCase")]
pub enum JobEvent {
	BeforeJob(JobExecution),
	AfterJob(JobExecution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
	BeforeJob,
	AfterJob,
}

impl JobEventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobEventKind::BeforeJob => "beforeJob",
			JobEventKind::AfterJob => "afterJob",
		}
	}
}

impl JobEvent {
	pub fn new(kind: JobEventKind, execution: JobExecution) -> Self {
		match kind {
			JobEventKind::BeforeJob => JobEvent::BeforeJob(execution),
			JobEventKind::AfterJob => JobEvent::AfterJob(execution),
		}
	}

	pub fn kind(&self) -> JobEventKind {
		match self {
			JobEvent::BeforeJob(_) => JobEventKind::BeforeJob,
			JobEvent::AfterJob(_) => JobEventKind::AfterJob,
		}
	}

	pub fn execution(&self) -> &JobExecution {
		match self {
			JobEvent::BeforeJob(execution) | JobEvent::AfterJob(execution) => execution,
		}
	}
}
