// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scenarios with executions dispatched to the isolated worker thread.

use std::sync::Arc;
use std::time::Duration;

use arbor_jobs::testing::{linear_model, RecordingListener, SteppingJob};
use arbor_jobs::{
	JobEvent, JobStatus, JobsManager, MemoryJobRepository, SweepResult, WorkerCodecs,
};
use arbor_jobs_config::{JobsConfig, WorkerConfig};
use serde_json::json;

async fn worker_manager() -> JobsManager {
	let config = JobsConfig {
		worker: WorkerConfig {
			enabled: true,
			reply_timeout_ms: 5_000,
		},
		..JobsConfig::default()
	};
	let manager = JobsManager::new(
		Arc::new(MemoryJobRepository::new()),
		&config,
		WorkerCodecs::default(),
	)
	.unwrap();
	manager
		.register_job(Arc::new(arbor_jobs::SensitivityAnalysisJob::new(&config.sweep)))
		.await
		.unwrap();
	manager
		.register_job(Arc::new(SteppingJob::new(
			"stepping",
			100,
			Duration::from_millis(10),
		)))
		.await
		.unwrap();
	manager
}

/// A sweep run on the worker finishes and its events reach listeners in order.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_sweep_finishes_with_events() {
	let manager = worker_manager().await;
	let listener = Arc::new(RecordingListener::default());
	manager.register_job_execution_listener(listener.clone());
	let mut events = manager.events();

	let values = json!({
		"variables": [{"name": "x", "min": 0, "max": 10, "length": 11}],
		"rule": "min"
	});
	let execution = manager
		.run("sensitivity-analysis", &values, &linear_model())
		.await
		.unwrap();
	assert_eq!(execution.status, JobStatus::Running);

	let finished = manager.wait_for_completion(&execution.id).await.unwrap();
	assert_eq!(finished.status, JobStatus::Finished);

	let result: SweepResult = serde_json::from_value(finished.result.unwrap()).unwrap();
	assert_eq!(result.rows.len(), 11);
	assert_eq!(result.rows[0].payoff, -1.0);
	assert_eq!(result.rows[0].policy[0].edge, "no");

	let first = events.recv().await.unwrap();
	assert!(matches!(first, JobEvent::BeforeJob(ref e) if e.id == execution.id));
	let second = events.recv().await.unwrap();
	assert!(matches!(second, JobEvent::AfterJob(ref e) if e.status == JobStatus::Finished));
	assert_eq!(
		listener.events(),
		vec![
			format!("beforeJob:{}", execution.id),
			format!("afterJob:{}", execution.id)
		]
	);

	manager.shutdown().await;
}

/// A stop requested from the caller side is observed by a job on the worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_job_honours_stop() {
	let manager = worker_manager().await;
	let execution = manager
		.run("stepping", &json!({}), &linear_model())
		.await
		.unwrap();
	while manager.get_progress(&execution.id).await.unwrap().fraction() == 0.0 {
		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	let outcome = manager.stop(&execution.id).await.unwrap();
	assert!(outcome.is_requested());
	let stopped = manager.wait_for_completion(&execution.id).await.unwrap();
	assert_eq!(stopped.status, JobStatus::Stopped);
	assert!(stopped.progress.current < 100);

	manager.shutdown().await;
}

/// Shutting the worker down winds running jobs down to STOPPED.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_shutdown_stops_jobs() {
	let manager = worker_manager().await;
	let execution = manager
		.run("stepping", &json!({}), &linear_model())
		.await
		.unwrap();

	manager.shutdown().await;
	let stopped = manager.get_job_execution(&execution.id).await.unwrap();
	assert_eq!(stopped.status, JobStatus::Stopped);
}
