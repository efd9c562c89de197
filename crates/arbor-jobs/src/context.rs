// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::repository::JobRepository;
use crate::types::{JobExecutionFlag, JobExecutionUpdate, JobProgress};

/// Handle a running job uses to report progress and observe stop requests.
pub struct JobContext {
	pub execution_id: String,
	pub job_name: String,
	pub cancellation_token: CancellationToken,
	repository: Arc<dyn JobRepository>,
	last_progress: Mutex<JobProgress>,
}

impl JobContext {
	pub fn new(
		execution_id: impl Into<String>,
		job_name: impl Into<String>,
		repository: Arc<dyn JobRepository>,
		cancellation_token: CancellationToken,
	) -> Self {
		Self {
			execution_id: execution_id.into(),
			job_name: job_name.into(),
			cancellation_token,
			repository,
			last_progress: Mutex::new(JobProgress::default()),
		}
	}

	/// Persist a progress checkpoint. Reports that would move progress backwards are dropped.
	pub async fn report_progress(&self, current: u64, total: u64) -> Result<()> {
		let progress = JobProgress::new(current, total);
		{
			let mut last = self.last_progress.lock().await;
			if progress.fraction() < last.fraction() {
				warn!(
					execution_id = %self.execution_id,
					current,
					total,
					previous = last.current,
					"ignoring progress report that moves backwards"
				);
				return Ok(());
			}
			*last = progress;
		}

		self.repository
			.update_job_execution(&self.execution_id, JobExecutionUpdate::progress(progress))
			.await?;
		Ok(())
	}

	/// Whether the job should wind down at its next checkpoint.
	pub async fn should_stop(&self) -> Result<bool> {
		if self.cancellation_token.is_cancelled() {
			return Ok(true);
		}
		let flag = self
			.repository
			.get_job_execution_flag(&self.execution_id)
			.await?;
		Ok(flag == JobExecutionFlag::Stop)
	}

	pub async fn progress(&self) -> JobProgress {
		*self.last_progress.lock().await
	}
}

#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
