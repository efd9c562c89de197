// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{JobRegistry, JobRepository};
use crate::error::{JobError, Result};
use crate::parameters::JobParameters;
use crate::types::{
	JobExecution, JobExecutionFlag, JobExecutionProgress, JobExecutionUpdate, JobStatus,
};

struct StoredExecution {
	execution: JobExecution,
	data: Option<String>,
	sequence: u64,
}

/// Volatile repository. Lost when the process exits.
///
/// Lock order is always `executions` before `flags`, which keeps a stop request
/// and a concluding status write from interleaving.
#[derive(Default)]
pub struct MemoryJobRepository {
	registry: JobRegistry,
	executions: RwLock<HashMap<String, StoredExecution>>,
	flags: RwLock<HashMap<String, JobExecutionFlag>>,
	sequence: AtomicU64,
}

impl MemoryJobRepository {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_flag(stored: &StoredExecution, flags: &HashMap<String, JobExecutionFlag>) -> JobExecution {
		let mut execution = stored.execution.clone();
		execution.flag = flags
			.get(&execution.id)
			.copied()
			.unwrap_or_default();
		execution
	}
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
	fn registry(&self) -> &JobRegistry {
		&self.registry
	}

	#[tracing::instrument(skip(self, parameters, data))]
	async fn create_job_execution(
		&self,
		job_name: &str,
		parameters: JobParameters,
		data: Option<String>,
	) -> Result<JobExecution> {
		if parameters.job_name() != job_name {
			return Err(JobError::invalid_parameter(
				"jobName",
				format!(
					"parameters belong to '{}', not '{job_name}'",
					parameters.job_name()
				),
			));
		}

		let execution = JobExecution::new(job_name, parameters);
		let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
		self.executions.write().await.insert(
			execution.id.clone(),
			StoredExecution {
				execution: execution.clone(),
				data,
				sequence,
			},
		);
		Ok(execution)
	}

	#[tracing::instrument(skip(self, update))]
	async fn update_job_execution(
		&self,
		id: &str,
		update: JobExecutionUpdate,
	) -> Result<JobExecution> {
		let mut executions = self.executions.write().await;
		let flags = self.flags.read().await;
		let stored = executions
			.get_mut(id)
			.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))?;

		let mut next = Self::with_flag(stored, &flags);
		next.apply(update)?;
		stored.execution = next.clone();
		Ok(next)
	}

	async fn get_job_execution_by_id(&self, id: &str) -> Result<Option<JobExecution>> {
		let executions = self.executions.read().await;
		let flags = self.flags.read().await;
		Ok(executions
			.get(id)
			.map(|stored| Self::with_flag(stored, &flags)))
	}

	async fn get_last_job_execution(
		&self,
		job_name: &str,
		parameters: &JobParameters,
	) -> Result<Option<JobExecution>> {
		let executions = self.executions.read().await;
		let flags = self.flags.read().await;
		Ok(executions
			.values()
			.filter(|stored| {
				stored.execution.job_name == job_name && &stored.execution.parameters == parameters
			})
			.max_by_key(|stored| stored.sequence)
			.map(|stored| Self::with_flag(stored, &flags)))
	}

	async fn get_job_execution_progress(&self, id: &str) -> Result<JobExecutionProgress> {
		self.executions
			.read()
			.await
			.get(id)
			.map(|stored| stored.execution.progress_view())
			.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))
	}

	#[tracing::instrument(skip(self))]
	async fn save_job_execution_flag(&self, id: &str, flag: JobExecutionFlag) -> Result<()> {
		let executions = self.executions.read().await;
		let stored = executions
			.get(id)
			.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))?;

		if flag == JobExecutionFlag::Stop && stored.execution.status != JobStatus::Running {
			return Err(JobError::NotRunning {
				execution_id: id.to_string(),
				status: stored.execution.status,
			});
		}

		self.flags.write().await.insert(id.to_string(), flag);
		Ok(())
	}

	async fn get_job_execution_flag(&self, id: &str) -> Result<JobExecutionFlag> {
		if !self.executions.read().await.contains_key(id) {
			return Err(JobError::ExecutionNotFound(id.to_string()));
		}
		Ok(self
			.flags
			.read()
			.await
			.get(id)
			.copied()
			.unwrap_or_default())
	}

	async fn get_job_execution_data(&self, id: &str) -> Result<Option<String>> {
		Ok(self
			.executions
			.read()
			.await
			.get(id)
			.and_then(|stored| stored.data.clone()))
	}

	async fn find_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
		let executions = self.executions.read().await;
		let flags = self.flags.read().await;
		let mut matching: Vec<&StoredExecution> = executions
			.values()
			.filter(|stored| stored.execution.job_name == job_name)
			.collect();
		matching.sort_by(|a, b| b.sequence.cmp(&a.sequence));
		Ok(matching
			.into_iter()
			.map(|stored| Self::with_flag(stored, &flags))
			.collect())
	}

	#[tracing::instrument(skip(self))]
	async fn remove_job_execution(&self, id: &str) -> Result<()> {
		let mut executions = self.executions.write().await;
		let mut flags = self.flags.write().await;
		if executions.remove(id).is_none() {
			return Err(JobError::ExecutionNotFound(id.to_string()));
		}
		flags.remove(id);
		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		let mut executions = self.executions.write().await;
		let mut flags = self.flags.write().await;
		executions.clear();
		flags.clear();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::contract;

	#[tokio::test]
	async fn test_create_and_fetch() {
		contract::create_and_fetch(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_mismatched_job_name_rejected() {
		contract::mismatched_job_name_rejected(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_update_enforces_transitions() {
		contract::update_enforces_transitions(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_stop_flag_only_while_running() {
		contract::stop_flag_only_while_running(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_last_execution_matches_parameters() {
		contract::last_execution_matches_parameters(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_progress_view() {
		contract::progress_view(&MemoryJobRepository::new()).await;
	}

	#[tokio::test]
	async fn test_remove_and_clear() {
		contract::remove_and_clear(&MemoryJobRepository::new()).await;
	}
}
