// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage of job definitions and execution records.
//!
//! Two backends share one contract: [`MemoryJobRepository`] keeps everything in
//! process memory, [`SqliteJobRepository`] survives process restarts.

mod memory;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use arbor_jobs_config::{RepositoryBackend, RepositoryConfig};

use crate::error::{JobError, Result};
use crate::job::Job;
use crate::parameters::JobParameters;
use crate::types::{JobExecution, JobExecutionFlag, JobExecutionProgress, JobExecutionUpdate};

pub use memory::MemoryJobRepository;
pub use sqlite::{create_pool, migrate, SqliteJobRepository};

#[async_trait]
pub trait JobRepository: Send + Sync {
	/// Name-keyed job definitions. Definitions are code and live in memory for every backend.
	fn registry(&self) -> &JobRegistry;

	async fn register_job(&self, job: Arc<dyn Job>) -> Result<()> {
		self.registry().register(job).await
	}

	async fn get_job_by_name(&self, name: &str) -> Result<Arc<dyn Job>> {
		self.registry().get(name).await
	}

	/// Create a NEW execution, storing the serialized snapshot next to it.
	async fn create_job_execution(
		&self,
		job_name: &str,
		parameters: JobParameters,
		data: Option<String>,
	) -> Result<JobExecution>;

	/// Apply a partial update atomically with respect to the execution's stop flag.
	async fn update_job_execution(
		&self,
		id: &str,
		update: JobExecutionUpdate,
	) -> Result<JobExecution>;

	async fn get_job_execution_by_id(&self, id: &str) -> Result<Option<JobExecution>>;

	/// Most recently created execution of `job_name` whose parameters equal `parameters`.
	async fn get_last_job_execution(
		&self,
		job_name: &str,
		parameters: &JobParameters,
	) -> Result<Option<JobExecution>>;

	async fn get_job_execution_progress(&self, id: &str) -> Result<JobExecutionProgress>;

	/// Set the control flag. STOP is only accepted while the execution is RUNNING.
	async fn save_job_execution_flag(&self, id: &str, flag: JobExecutionFlag) -> Result<()>;

	async fn get_job_execution_flag(&self, id: &str) -> Result<JobExecutionFlag>;

	async fn get_job_execution_data(&self, id: &str) -> Result<Option<String>>;

	/// Executions of `job_name`, newest first.
	async fn find_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>>;

	/// Delete an execution together with its flag and snapshot.
	async fn remove_job_execution(&self, id: &str) -> Result<()>;

	/// Delete every execution record. Registered jobs are kept.
	async fn clear(&self) -> Result<()>;
}

/// Registered job definitions keyed by name.
#[derive(Default)]
pub struct JobRegistry {
	jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
}

impl JobRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn register(&self, job: Arc<dyn Job>) -> Result<()> {
		let name = job.name().to_string();
		let mut jobs = self.jobs.write().await;
		if jobs.contains_key(&name) {
			return Err(JobError::DuplicateJob(name));
		}
		debug!(job_name = %name, "registered job");
		jobs.insert(name, job);
		Ok(())
	}

	pub async fn get(&self, name: &str) -> Result<Arc<dyn Job>> {
		self.jobs
			.read()
			.await
			.get(name)
			.cloned()
			.ok_or_else(|| JobError::JobNotFound(name.to_string()))
	}

	pub async fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
		names.sort();
		names
	}
}

/// Open the repository backend selected by configuration.
pub async fn open_repository(config: &RepositoryConfig) -> Result<Arc<dyn JobRepository>> {
	match config.backend {
		RepositoryBackend::Memory => {
			info!("using in-memory job repository");
			Ok(Arc::new(MemoryJobRepository::new()))
		}
		RepositoryBackend::Sqlite => {
			info!(database_url = %config.database_url, "using sqlite job repository");
			let pool = create_pool(&config.database_url).await?;
			migrate(&pool).await?;
			Ok(Arc::new(SqliteJobRepository::new(pool)))
		}
	}
}

/// Contract tests run against every backend.
#[cfg(test)]
pub(crate) mod contract {
	use super::*;
	use crate::types::{JobProgress, JobStatus};
	use serde_json::json;

	fn params(x: i64) -> JobParameters {
		JobParameters::from_value("sweep", &json!({ "x": x })).unwrap()
	}

	async fn running(repo: &dyn JobRepository, x: i64) -> JobExecution {
		let execution = repo
			.create_job_execution("sweep", params(x), Some("{}".to_string()))
			.await
			.unwrap();
		repo.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Running))
			.await
			.unwrap()
	}

	pub async fn create_and_fetch(repo: &dyn JobRepository) {
		let created = repo
			.create_job_execution("sweep", params(1), Some("snapshot".to_string()))
			.await
			.unwrap();
		assert_eq!(created.status, JobStatus::New);

		let fetched = repo
			.get_job_execution_by_id(&created.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(fetched.id, created.id);
		assert_eq!(fetched.parameters, params(1));
		assert_eq!(fetched.flag, JobExecutionFlag::None);
		assert_eq!(
			repo.get_job_execution_data(&created.id).await.unwrap().as_deref(),
			Some("snapshot")
		);
		assert!(repo.get_job_execution_by_id("missing").await.unwrap().is_none());
	}

	pub async fn mismatched_job_name_rejected(repo: &dyn JobRepository) {
		let result = repo.create_job_execution("other", params(1), None).await;
		assert!(matches!(result, Err(JobError::InvalidParameter { .. })));
	}

	pub async fn update_enforces_transitions(repo: &dyn JobRepository) {
		let execution = repo.create_job_execution("sweep", params(1), None).await.unwrap();

		let result = repo
			.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Finished))
			.await;
		assert!(matches!(result, Err(JobError::InvalidTransition { .. })));

		repo.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Running))
			.await
			.unwrap();
		let updated = repo
			.update_job_execution(
				&execution.id,
				JobExecutionUpdate::progress(JobProgress::new(3, 10)),
			)
			.await
			.unwrap();
		assert_eq!(updated.status, JobStatus::Running);
		assert_eq!(updated.progress, JobProgress::new(3, 10));

		let finished = repo
			.update_job_execution(
				&execution.id,
				JobExecutionUpdate::status(JobStatus::Finished).with_result(json!({"rows": []})),
			)
			.await
			.unwrap();
		assert_eq!(finished.result, Some(json!({"rows": []})));

		let result = repo
			.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Running))
			.await;
		assert!(matches!(result, Err(JobError::InvalidTransition { .. })));

		let result = repo
			.update_job_execution("missing", JobExecutionUpdate::status(JobStatus::Running))
			.await;
		assert!(matches!(result, Err(JobError::ExecutionNotFound(_))));
	}

	pub async fn stop_flag_only_while_running(repo: &dyn JobRepository) {
		let execution = repo.create_job_execution("sweep", params(1), None).await.unwrap();
		let result = repo
			.save_job_execution_flag(&execution.id, JobExecutionFlag::Stop)
			.await;
		assert!(matches!(result, Err(JobError::NotRunning { .. })));

		let execution = running(repo, 2).await;
		repo.save_job_execution_flag(&execution.id, JobExecutionFlag::Stop)
			.await
			.unwrap();
		assert_eq!(
			repo.get_job_execution_flag(&execution.id).await.unwrap(),
			JobExecutionFlag::Stop
		);

		let result = repo
			.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Finished))
			.await;
		assert!(matches!(result, Err(JobError::StopRequested(_))));

		let stopped = repo
			.update_job_execution(&execution.id, JobExecutionUpdate::status(JobStatus::Stopped))
			.await
			.unwrap();
		assert_eq!(stopped.status, JobStatus::Stopped);
		assert_eq!(stopped.flag, JobExecutionFlag::Stop);

		let result = repo
			.save_job_execution_flag("missing", JobExecutionFlag::Stop)
			.await;
		assert!(matches!(result, Err(JobError::ExecutionNotFound(_))));
	}

	pub async fn last_execution_matches_parameters(repo: &dyn JobRepository) {
		let first = repo.create_job_execution("sweep", params(1), None).await.unwrap();
		let second = repo.create_job_execution("sweep", params(1), None).await.unwrap();
		let other = repo.create_job_execution("sweep", params(2), None).await.unwrap();

		let last = repo
			.get_last_job_execution("sweep", &params(1))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(last.id, second.id);
		assert_ne!(last.id, first.id);

		let last = repo
			.get_last_job_execution("sweep", &params(2))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(last.id, other.id);

		assert!(repo
			.get_last_job_execution("sweep", &params(3))
			.await
			.unwrap()
			.is_none());

		let all = repo.find_job_executions("sweep").await.unwrap();
		assert_eq!(all.len(), 3);
		assert_eq!(all[0].id, other.id);
	}

	pub async fn progress_view(repo: &dyn JobRepository) {
		let execution = running(repo, 1).await;
		repo.update_job_execution(
			&execution.id,
			JobExecutionUpdate::progress(JobProgress::new(4, 8)),
		)
		.await
		.unwrap();

		let view = repo.get_job_execution_progress(&execution.id).await.unwrap();
		assert_eq!(view.status, JobStatus::Running);
		assert_eq!(view.fraction(), 0.5);

		let result = repo.get_job_execution_progress("missing").await;
		assert!(matches!(result, Err(JobError::ExecutionNotFound(_))));
	}

	pub async fn remove_and_clear(repo: &dyn JobRepository) {
		let a = running(repo, 1).await;
		let b = repo.create_job_execution("sweep", params(2), Some("data".to_string())).await.unwrap();
		repo.save_job_execution_flag(&a.id, JobExecutionFlag::Stop)
			.await
			.unwrap();

		repo.remove_job_execution(&a.id).await.unwrap();
		assert!(repo.get_job_execution_by_id(&a.id).await.unwrap().is_none());
		let result = repo.remove_job_execution(&a.id).await;
		assert!(matches!(result, Err(JobError::ExecutionNotFound(_))));

		repo.clear().await.unwrap();
		assert!(repo.get_job_execution_by_id(&b.id).await.unwrap().is_none());
		assert!(repo.get_job_execution_data(&b.id).await.unwrap().is_none());
		assert!(repo.find_job_executions("sweep").await.unwrap().is_empty());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::StaticJob;

	#[tokio::test]
	async fn test_duplicate_registration_rejected() {
		let registry = JobRegistry::new();
		registry.register(Arc::new(StaticJob::new("sweep"))).await.unwrap();

		let result = registry.register(Arc::new(StaticJob::new("sweep"))).await;
		assert!(matches!(result, Err(JobError::DuplicateJob(name)) if name == "sweep"));
		assert_eq!(registry.names().await, vec!["sweep".to_string()]);
	}

	#[tokio::test]
	async fn test_unknown_job_not_found() {
		let registry = JobRegistry::new();
		let result = registry.get("nope").await;
		assert!(matches!(result, Err(JobError::JobNotFound(_))));
	}
}
