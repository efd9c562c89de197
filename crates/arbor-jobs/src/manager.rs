// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use arbor_jobs_config::JobsConfig;
use arbor_tree::DecisionModel;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::error::{JobError, Result};
use crate::job::Job;
use crate::jobs::SensitivityAnalysisJob;
use crate::launcher::{JobLauncher, StopOutcome};
use crate::listener::{JobExecutionListener, ListenerRegistry};
use crate::parameters::JobParameters;
use crate::repository::{open_repository, JobRepository};
use crate::types::{JobEvent, JobEventKind, JobExecution, JobExecutionProgress, JobStatus};
use crate::worker::{JobWorker, WorkerCodecs};

/// Entry point for callers: one repository, one launcher, and an optional worker.
pub struct JobsManager {
	repository: Arc<dyn JobRepository>,
	launcher: JobLauncher,
	listeners: Arc<ListenerRegistry>,
}

impl JobsManager {
	/// Build from configuration and register the built-in jobs.
	pub async fn from_config(config: &JobsConfig) -> Result<Self> {
		let repository = open_repository(&config.repository).await?;
		let manager = Self::new(repository, config, WorkerCodecs::default())?;
		manager
			.register_job(Arc::new(SensitivityAnalysisJob::new(&config.sweep)))
			.await?;
		Ok(manager)
	}

	/// Build around an existing repository. Spawns the worker when it is enabled,
	/// so this must run inside a tokio runtime.
	pub fn new(
		repository: Arc<dyn JobRepository>,
		config: &JobsConfig,
		codecs: WorkerCodecs,
	) -> Result<Self> {
		let listeners = Arc::new(ListenerRegistry::new());
		let mut launcher = JobLauncher::new(
			repository.clone(),
			codecs.snapshot.clone(),
			listeners.clone(),
			&config.launcher,
		);

		if config.worker.enabled {
			let worker = Arc::new(JobWorker::spawn(
				repository.clone(),
				codecs,
				Duration::from_millis(config.worker.reply_timeout_ms),
			)?);
			for kind in [JobEventKind::BeforeJob, JobEventKind::AfterJob] {
				let listeners = listeners.clone();
				worker.add_listener(kind, move |execution| {
					listeners.dispatch(&JobEvent::new(kind, execution.clone()));
				});
			}
			launcher = launcher.with_worker(worker);
		}

		info!(
			worker_enabled = config.worker.enabled,
			duplicate_policy = ?config.launcher.duplicate_policy,
			"jobs manager ready"
		);
		Ok(Self {
			repository,
			launcher,
			listeners,
		})
	}

	pub fn repository(&self) -> &Arc<dyn JobRepository> {
		&self.repository
	}

	pub async fn register_job(&self, job: Arc<dyn Job>) -> Result<()> {
		self.repository.register_job(job).await
	}

	pub fn register_job_execution_listener(&self, listener: Arc<dyn JobExecutionListener>) {
		self.listeners.register(listener);
	}

	/// Subscribe to lifecycle events of every execution.
	pub fn events(&self) -> broadcast::Receiver<JobEvent> {
		self.listeners.subscribe()
	}

	pub async fn create_job_parameters(&self, job_name: &str, values: &Value) -> Result<JobParameters> {
		self.repository
			.get_job_by_name(job_name)
			.await?
			.create_job_parameters(values)
	}

	pub async fn run(
		&self,
		job_name: &str,
		values: &Value,
		snapshot: &DecisionModel,
	) -> Result<JobExecution> {
		self.launcher.run(job_name, values, snapshot).await
	}

	pub async fn execute(&self, execution_id: &str) -> Result<JobExecution> {
		self.launcher.execute(execution_id).await
	}

	pub async fn stop(&self, execution_id: &str) -> Result<StopOutcome> {
		self.launcher.stop(execution_id).await
	}

	pub async fn discard(&self, execution_id: &str) -> Result<JobExecution> {
		self.launcher.discard(execution_id).await
	}

	pub async fn rerun(&self, execution_id: &str) -> Result<JobExecution> {
		self.launcher.rerun(execution_id).await
	}

	pub async fn get_progress(&self, execution_id: &str) -> Result<JobExecutionProgress> {
		self.repository.get_job_execution_progress(execution_id).await
	}

	pub async fn get_job_execution(&self, execution_id: &str) -> Result<JobExecution> {
		self.repository
			.get_job_execution_by_id(execution_id)
			.await?
			.ok_or_else(|| JobError::ExecutionNotFound(execution_id.to_string()))
	}

	/// Most recent execution of `job_name` whose normalized parameters equal `values`.
	pub async fn get_last_job_execution(
		&self,
		job_name: &str,
		values: &Value,
	) -> Result<Option<JobExecution>> {
		let parameters = self.create_job_parameters(job_name, values).await?;
		self.repository
			.get_last_job_execution(job_name, &parameters)
			.await
	}

	/// Wait until the execution reaches a terminal status.
	///
	/// Fails with [`JobError::Restart`] for a RUNNING execution that no live
	/// executor owns, since it would never finish.
	#[instrument(skip(self))]
	pub async fn wait_for_completion(&self, execution_id: &str) -> Result<JobExecution> {
		let mut events = self.listeners.subscribe();
		loop {
			let execution = self.get_job_execution(execution_id).await?;
			if execution.status.is_terminal() {
				return Ok(execution);
			}
			if !self.launcher.is_active(execution_id).await {
				// Executors release their claim only after the terminal write, so re-read once.
				let execution = self.get_job_execution(execution_id).await?;
				if execution.status.is_terminal() {
					return Ok(execution);
				}
				return Err(match execution.status {
					JobStatus::Running => JobError::Restart {
						execution_id: execution.id,
					},
					status => JobError::InvalidState {
						execution_id: execution.id,
						status,
					},
				});
			}

			match events.recv().await {
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => {
					return Err(JobError::Worker("job event channel closed".to_string()))
				}
			}
		}
	}

	/// Stop every live execution and the worker.
	pub async fn shutdown(&self) {
		info!("shutting down jobs manager");
		self.launcher.shutdown().await;
	}
}
