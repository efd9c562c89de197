// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drives one execution through its lifecycle. Shared by the in-process launcher
//! path and the worker.

use std::sync::Arc;
use std::time::Instant;

use arbor_tree::DecisionModel;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::codec::MessageCodec;
use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::job::{Job, JobOutcome};
use crate::repository::JobRepository;
use crate::types::{JobExecution, JobExecutionUpdate, JobStatus};

/// Move a NEW execution to RUNNING.
///
/// The repository applies the transition atomically, so of two concurrent
/// starts only one succeeds; the other gets [`JobError::InvalidState`].
pub(crate) async fn begin(repository: &dyn JobRepository, execution_id: &str) -> Result<JobExecution> {
	let running = repository
		.update_job_execution(
			execution_id,
			JobExecutionUpdate::status(JobStatus::Running).with_start_time(Utc::now()),
		)
		.await
		.map_err(|e| match e {
			JobError::InvalidTransition {
				execution_id,
				from,
				..
			} => JobError::InvalidState {
				execution_id,
				status: from,
			},
			other => other,
		})?;
	info!(execution_id = %running.id, job_name = %running.job_name, "job execution started");
	Ok(running)
}

/// Run the job body against a private copy of the snapshot and record the terminal status.
#[instrument(skip_all, fields(execution_id = %execution.id, job_name = %execution.job_name))]
pub(crate) async fn complete(
	job: Arc<dyn Job>,
	repository: Arc<dyn JobRepository>,
	execution: &JobExecution,
	data: &str,
	codec: &dyn MessageCodec<DecisionModel>,
	cancellation_token: CancellationToken,
) -> Result<JobExecution> {
	let started = Instant::now();
	let ctx = JobContext::new(
		execution.id.clone(),
		execution.job_name.clone(),
		repository.clone(),
		cancellation_token,
	);

	let outcome = match codec.decode(data) {
		Ok(snapshot) => job.execute(&ctx, &execution.parameters, &snapshot).await,
		Err(e) => Err(e),
	};

	let update = match outcome {
		Ok(JobOutcome::Completed(result)) => {
			JobExecutionUpdate::status(JobStatus::Finished).with_result(result)
		}
		Ok(JobOutcome::Stopped(partial)) => {
			JobExecutionUpdate::status(JobStatus::Stopped).with_result(partial)
		}
		Err(e) => {
			error!(error = %e, "job execution failed");
			JobExecutionUpdate::status(JobStatus::Failed).with_error(e.to_string())
		}
	}
	.with_end_time(Utc::now());

	let finished = match repository
		.update_job_execution(&execution.id, update.clone())
		.await
	{
		Err(JobError::StopRequested(_)) => {
			warn!("stop requested as the job completed, recording it as stopped");
			repository
				.update_job_execution(
					&execution.id,
					JobExecutionUpdate {
						status: Some(JobStatus::Stopped),
						..update
					},
				)
				.await?
		}
		other => other?,
	};

	info!(
		status = %finished.status,
		duration_ms = started.elapsed().as_millis() as u64,
		"job execution ended"
	);
	Ok(finished)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::JsonCodec;
	use crate::repository::MemoryJobRepository;
	use crate::testing::{linear_model, StaticJob};
	use crate::types::JobExecutionFlag;
	use serde_json::json;

	async fn prepared(
		job: &StaticJob,
	) -> (Arc<dyn JobRepository>, JobExecution, String) {
		let repository: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
		let params = job.create_job_parameters(&json!({})).unwrap();
		let codec = JsonCodec::<DecisionModel>::new();
		let data = codec.encode(&linear_model()).unwrap();
		let execution = repository
			.create_job_execution(job.name(), params, Some(data.clone()))
			.await
			.unwrap();
		(repository, execution, data)
	}

	#[tokio::test]
	async fn test_completed_job_is_finished() {
		let job = StaticJob::new("static").with_result(json!({"answer": 42}));
		let (repository, execution, data) = prepared(&job).await;
		begin(repository.as_ref(), &execution.id).await.unwrap();

		let finished = complete(
			Arc::new(job),
			repository,
			&execution,
			&data,
			&JsonCodec::<DecisionModel>::new(),
			CancellationToken::new(),
		)
		.await
		.unwrap();
		assert_eq!(finished.status, JobStatus::Finished);
		assert_eq!(finished.result, Some(json!({"answer": 42})));
		assert!(finished.start_time.is_some());
		assert!(finished.end_time.is_some());
	}

	#[tokio::test]
	async fn test_second_begin_is_invalid_state() {
		let job = StaticJob::new("static");
		let (repository, execution, _) = prepared(&job).await;

		let (first, second) = tokio::join!(
			begin(repository.as_ref(), &execution.id),
			begin(repository.as_ref(), &execution.id)
		);
		let started = [&first, &second].iter().filter(|r| r.is_ok()).count();
		assert_eq!(started, 1);
		let loser = if first.is_ok() { second } else { first };
		assert!(matches!(
			loser,
			Err(JobError::InvalidState {
				status: JobStatus::Running,
				..
			})
		));
	}

	#[tokio::test]
	async fn test_job_error_is_recorded_as_failed() {
		let job = StaticJob::new("static").failing("bad input");
		let (repository, execution, data) = prepared(&job).await;
		begin(repository.as_ref(), &execution.id).await.unwrap();

		let finished = complete(
			Arc::new(job),
			repository,
			&execution,
			&data,
			&JsonCodec::<DecisionModel>::new(),
			CancellationToken::new(),
		)
		.await
		.unwrap();
		assert_eq!(finished.status, JobStatus::Failed);
		assert!(finished.error.unwrap().contains("bad input"));
	}

	#[tokio::test]
	async fn test_undecodable_snapshot_fails_execution() {
		let job = StaticJob::new("static");
		let (repository, execution, _) = prepared(&job).await;
		begin(repository.as_ref(), &execution.id).await.unwrap();

		let finished = complete(
			Arc::new(job),
			repository,
			&execution,
			"{broken",
			&JsonCodec::<DecisionModel>::new(),
			CancellationToken::new(),
		)
		.await
		.unwrap();
		assert_eq!(finished.status, JobStatus::Failed);
	}

	#[tokio::test]
	async fn test_stop_flag_wins_over_completion() {
		let job = StaticJob::new("static").with_result(json!({"rows": [1, 2, 3]}));
		let (repository, execution, data) = prepared(&job).await;
		begin(repository.as_ref(), &execution.id).await.unwrap();
		repository
			.save_job_execution_flag(&execution.id, JobExecutionFlag::Stop)
			.await
			.unwrap();

		let finished = complete(
			Arc::new(job),
			repository,
			&execution,
			&data,
			&JsonCodec::<DecisionModel>::new(),
			CancellationToken::new(),
		)
		.await
		.unwrap();
		assert_eq!(finished.status, JobStatus::Stopped);
		assert_eq!(finished.result, Some(json!({"rows": [1, 2, 3]})));
	}
}
