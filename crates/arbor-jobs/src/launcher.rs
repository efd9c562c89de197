// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;

use arbor_jobs_config::{DuplicateRunPolicy, LauncherConfig};
use arbor_tree::DecisionModel;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::codec::MessageCodec;
use crate::context::CancellationToken;
use crate::error::{JobError, Result};
use crate::executor;
use crate::job::Job;
use crate::listener::ListenerRegistry;
use crate::repository::JobRepository;
use crate::types::{JobEvent, JobExecution, JobExecutionFlag, JobExecutionUpdate, JobStatus};
use crate::worker::JobWorker;

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
	/// The STOP flag was recorded; the job will stop at its next checkpoint.
	Requested(JobExecution),
	/// The execution was not running. Nothing changed.
	NotRunning(JobExecution),
}

impl StopOutcome {
	pub fn execution(&self) -> &JobExecution {
		match self {
			StopOutcome::Requested(execution) | StopOutcome::NotRunning(execution) => execution,
		}
	}

	pub fn is_requested(&self) -> bool {
		matches!(self, StopOutcome::Requested(_))
	}
}

/// Creates executions and hands them to an executor, in process or on the worker.
pub struct JobLauncher {
	repository: Arc<dyn JobRepository>,
	codec: Arc<dyn MessageCodec<DecisionModel>>,
	listeners: Arc<ListenerRegistry>,
	worker: Option<Arc<JobWorker>>,
	duplicate_policy: DuplicateRunPolicy,
	active: Arc<Mutex<HashMap<String, CancellationToken>>>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobLauncher {
	pub fn new(
		repository: Arc<dyn JobRepository>,
		codec: Arc<dyn MessageCodec<DecisionModel>>,
		listeners: Arc<ListenerRegistry>,
		config: &LauncherConfig,
	) -> Self {
		Self {
			repository,
			codec,
			listeners,
			worker: None,
			duplicate_policy: config.duplicate_policy,
			active: Arc::default(),
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Execute through the worker instead of on the caller's runtime.
	pub fn with_worker(mut self, worker: Arc<JobWorker>) -> Self {
		self.worker = Some(worker);
		self
	}

	/// Create an execution for `job_name` and start it. Resolves once it is RUNNING.
	#[instrument(skip(self, values, snapshot))]
	pub async fn run(
		&self,
		job_name: &str,
		values: &Value,
		snapshot: &DecisionModel,
	) -> Result<JobExecution> {
		let job = self.repository.get_job_by_name(job_name).await?;
		let parameters = job.create_job_parameters(values)?;

		if self.duplicate_policy == DuplicateRunPolicy::Reject {
			if let Some(last) = self
				.repository
				.get_last_job_execution(job_name, &parameters)
				.await?
			{
				if last.is_running() {
					return Err(JobError::AlreadyRunning(last.id));
				}
			}
		}

		let data = self.codec.encode(snapshot)?;
		let execution = self
			.repository
			.create_job_execution(job_name, parameters, Some(data.clone()))
			.await?;
		info!(execution_id = %execution.id, "job execution created");

		self.dispatch(job, execution, data).await
	}

	/// Start an existing NEW execution.
	#[instrument(skip(self))]
	pub async fn execute(&self, execution_id: &str) -> Result<JobExecution> {
		let execution = self.load(execution_id).await?;
		match execution.status {
			JobStatus::New => {}
			JobStatus::Running => {
				if self.is_active(execution_id).await {
					return Err(JobError::AlreadyRunning(execution.id));
				}
				warn!(execution_id, "running execution has no executor attached");
				return Err(JobError::Restart {
					execution_id: execution.id,
				});
			}
			status => {
				return Err(JobError::InvalidState {
					execution_id: execution.id,
					status,
				});
			}
		}

		let job = self.repository.get_job_by_name(&execution.job_name).await?;
		let data = self.snapshot_data(execution_id).await?;
		self.dispatch(job, execution, data).await
	}

	/// Flag a running execution to stop at its next checkpoint.
	#[instrument(skip(self))]
	pub async fn stop(&self, execution_id: &str) -> Result<StopOutcome> {
		let execution = self.load(execution_id).await?;
		if !execution.is_running() {
			warn!(execution_id, status = %execution.status, "job execution is not running");
			return Ok(StopOutcome::NotRunning(execution));
		}

		match self
			.repository
			.save_job_execution_flag(execution_id, JobExecutionFlag::Stop)
			.await
		{
			Ok(()) => {
				info!(execution_id, "stop requested");
				Ok(StopOutcome::Requested(JobExecution {
					flag: JobExecutionFlag::Stop,
					..execution
				}))
			}
			Err(JobError::NotRunning { status, .. }) => {
				warn!(execution_id, status = %status, "job execution ended before the stop was recorded");
				Ok(StopOutcome::NotRunning(self.load(execution_id).await?))
			}
			Err(e) => Err(e),
		}
	}

	/// Delete an orphaned execution record.
	#[instrument(skip(self))]
	pub async fn discard(&self, execution_id: &str) -> Result<JobExecution> {
		let execution = self.load(execution_id).await?;
		if self.is_active(execution_id).await {
			return Err(JobError::AlreadyRunning(execution.id));
		}
		self.repository.remove_job_execution(execution_id).await?;
		info!(execution_id, status = %execution.status, "job execution discarded");
		Ok(execution)
	}

	/// Abandon an orphaned RUNNING execution and start a fresh one with the same
	/// parameters and snapshot.
	#[instrument(skip(self))]
	pub async fn rerun(&self, execution_id: &str) -> Result<JobExecution> {
		let stale = self.load(execution_id).await?;
		if stale.status != JobStatus::Running {
			return Err(JobError::InvalidState {
				execution_id: stale.id,
				status: stale.status,
			});
		}
		if self.is_active(execution_id).await {
			return Err(JobError::AlreadyRunning(stale.id));
		}

		let job = self.repository.get_job_by_name(&stale.job_name).await?;
		let data = self.snapshot_data(execution_id).await?;
		self.repository
			.update_job_execution(
				execution_id,
				JobExecutionUpdate::status(JobStatus::Failed)
					.with_error("abandoned: no executor attached after restart")
					.with_end_time(Utc::now()),
			)
			.await?;

		let execution = self
			.repository
			.create_job_execution(&stale.job_name, stale.parameters, Some(data.clone()))
			.await?;
		info!(
			previous_execution_id = execution_id,
			execution_id = %execution.id,
			"job execution re-run"
		);
		self.dispatch(job, execution, data).await
	}

	/// Whether a live executor in this process (or its worker) owns the execution.
	pub async fn is_active(&self, execution_id: &str) -> bool {
		if self.active.lock().await.contains_key(execution_id) {
			return true;
		}
		match &self.worker {
			Some(worker) => worker.is_executing(execution_id).await,
			None => false,
		}
	}

	/// Cancel in-process executions, wait for them to record their outcome, and stop the worker.
	pub async fn shutdown(&self) {
		for token in self.active.lock().await.values() {
			token.cancel();
		}

		let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
		info!(count = handles.len(), "waiting for job executions to finish");
		for handle in handles {
			if let Err(e) = handle.await {
				error!(error = %e, "job task panicked");
			}
		}

		if let Some(worker) = &self.worker {
			worker.shutdown().await;
		}
	}

	async fn load(&self, execution_id: &str) -> Result<JobExecution> {
		self.repository
			.get_job_execution_by_id(execution_id)
			.await?
			.ok_or_else(|| JobError::ExecutionNotFound(execution_id.to_string()))
	}

	async fn snapshot_data(&self, execution_id: &str) -> Result<String> {
		self.repository
			.get_job_execution_data(execution_id)
			.await?
			.ok_or_else(|| JobError::Codec(format!("no snapshot stored for execution {execution_id}")))
	}

	async fn dispatch(
		&self,
		job: Arc<dyn Job>,
		execution: JobExecution,
		data: String,
	) -> Result<JobExecution> {
		if let Some(worker) = &self.worker {
			return worker.execute(&execution.id).await;
		}

		let token = CancellationToken::new();
		{
			let mut active = self.active.lock().await;
			if active.contains_key(&execution.id) {
				return Err(JobError::AlreadyRunning(execution.id));
			}
			active.insert(execution.id.clone(), token.clone());
		}

		let running = match executor::begin(self.repository.as_ref(), &execution.id).await {
			Ok(running) => running,
			Err(e) => {
				self.active.lock().await.remove(&execution.id);
				return Err(e);
			}
		};
		self.listeners.dispatch(&JobEvent::BeforeJob(running.clone()));

		let repository = self.repository.clone();
		let codec = self.codec.clone();
		let listeners = self.listeners.clone();
		let active = self.active.clone();
		let task_execution = running.clone();
		let handle = tokio::spawn(async move {
			let finished = match executor::complete(
				job,
				repository.clone(),
				&task_execution,
				&data,
				codec.as_ref(),
				token,
			)
			.await
			{
				Ok(finished) => finished,
				Err(e) => {
					error!(execution_id = %task_execution.id, error = %e, "failed to record job outcome");
					repository
						.get_job_execution_by_id(&task_execution.id)
						.await
						.ok()
						.flatten()
						.unwrap_or_else(|| task_execution.clone())
				}
			};
			listeners.dispatch(&JobEvent::AfterJob(finished));
			active.lock().await.remove(&task_execution.id);
		});

		let mut handles = self.handles.lock().await;
		handles.retain(|handle| !handle.is_finished());
		handles.push(handle);

		Ok(running)
	}
}
