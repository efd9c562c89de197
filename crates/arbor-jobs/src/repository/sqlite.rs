// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use super::{JobRegistry, JobRepository};
use crate::error::{JobError, Result};
use crate::parameters::JobParameters;
use crate::types::{
	JobExecution, JobExecutionFlag, JobExecutionProgress, JobExecutionUpdate, JobProgress,
	JobStatus,
};

/// How long a connection waits for another writer before failing with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a SqlitePool with WAL mode and common settings.
///
/// In-memory databases are limited to a single connection, since every
/// connection would otherwise see its own empty database.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| JobError::invalid_parameter("database_url", format!("invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	let mut pool_options = SqlitePoolOptions::new();
	if database_url.contains(":memory:") {
		pool_options = pool_options.max_connections(1);
	}
	let pool = pool_options.connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Create the execution tables if they do not exist yet.
#[tracing::instrument(skip(pool))]
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS job_executions (
			seq INTEGER PRIMARY KEY AUTOINCREMENT,
			id TEXT NOT NULL UNIQUE,
			job_name TEXT NOT NULL,
			parameters TEXT NOT NULL,
			status TEXT NOT NULL,
			progress_current INTEGER NOT NULL DEFAULT 0,
			progress_total INTEGER NOT NULL DEFAULT 0,
			create_time TEXT NOT NULL,
			start_time TEXT,
			end_time TEXT,
			result TEXT,
			error TEXT
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_job_executions_lookup ON job_executions(job_name, parameters)",
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS job_execution_flags (
			execution_id TEXT PRIMARY KEY,
			flag TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS job_execution_data (
			execution_id TEXT PRIMARY KEY,
			data TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	tracing::debug!("job execution tables ready");
	Ok(())
}

type ExecutionRow = (
	String,
	String,
	String,
	String,
	i64,
	i64,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
	Option<String>,
	Option<String>,
	Option<String>,
);

const SELECT_EXECUTION: &str = r#"
	SELECT e.id, e.job_name, e.parameters, e.status, e.progress_current, e.progress_total,
	       e.create_time, e.start_time, e.end_time, e.result, e.error, f.flag
	FROM job_executions e
	LEFT JOIN job_execution_flags f ON f.execution_id = e.id
"#;

fn row_to_execution(row: ExecutionRow) -> Result<JobExecution> {
	let (
		id,
		job_name,
		parameters,
		status,
		progress_current,
		progress_total,
		create_time,
		start_time,
		end_time,
		result,
		error,
		flag,
	) = row;

	Ok(JobExecution {
		parameters: JobParameters::from_canonical_json(job_name.clone(), &parameters)?,
		status: status.parse().map_err(JobError::Failed)?,
		progress: JobProgress::new(progress_current.max(0) as u64, progress_total.max(0) as u64),
		flag: flag
			.as_deref()
			.map(|flag| flag.parse::<JobExecutionFlag>())
			.transpose()
			.map_err(JobError::Failed)?
			.unwrap_or_default(),
		result: result.as_deref().map(serde_json::from_str).transpose()?,
		id,
		job_name,
		create_time,
		start_time,
		end_time,
		error,
	})
}

/// Durable repository on SQLite.
///
/// Several processes may share one database file (a worker in one, `arbor stop`
/// in another), so every check-then-write is a single conditional statement:
/// status updates only land if the stored status is still the one the update
/// was validated against, and a STOP flag only lands on a RUNNING execution.
/// A statement that matches nothing re-reads the record and validates again.
pub struct SqliteJobRepository {
	pool: SqlitePool,
	registry: JobRegistry,
}

impl SqliteJobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			registry: JobRegistry::new(),
		}
	}

	async fn fetch_execution(&self, id: &str) -> Result<Option<JobExecution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!("{SELECT_EXECUTION} WHERE e.id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(row_to_execution).transpose()
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
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
		let canonical = execution.parameters.to_canonical_json()?;

		let mut tx = self.pool.begin().await?;
		sqlx::query(
			r#"
			INSERT INTO job_executions (id, job_name, parameters, status, progress_current, progress_total, create_time)
			VALUES (?, ?, ?, ?, 0, 0, ?)
			"#,
		)
		.bind(&execution.id)
		.bind(&execution.job_name)
		.bind(&canonical)
		.bind(execution.status.as_str())
		.bind(execution.create_time)
		.execute(&mut *tx)
		.await?;

		if let Some(data) = &data {
			sqlx::query("INSERT INTO job_execution_data (execution_id, data) VALUES (?, ?)")
				.bind(&execution.id)
				.bind(data)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;

		Ok(execution)
	}

	#[tracing::instrument(skip(self, update))]
	async fn update_job_execution(
		&self,
		id: &str,
		update: JobExecutionUpdate,
	) -> Result<JobExecution> {
		loop {
			let mut execution = self
				.fetch_execution(id)
				.await?
				.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))?;
			let expected = execution.status;
			execution.apply(update.clone())?;

			let result = execution
				.result
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?;
			let written = sqlx::query(
				r#"
				UPDATE job_executions
				SET status = ?,
				    progress_current = ?,
				    progress_total = ?,
				    start_time = ?,
				    end_time = ?,
				    result = ?,
				    error = ?
				WHERE id = ?
				  AND status = ?
				  AND (? != 'finished' OR NOT EXISTS (
				      SELECT 1 FROM job_execution_flags
				      WHERE execution_id = job_executions.id AND flag = 'stop'))
				"#,
			)
			.bind(execution.status.as_str())
			.bind(execution.progress.current as i64)
			.bind(execution.progress.total as i64)
			.bind(execution.start_time)
			.bind(execution.end_time)
			.bind(result)
			.bind(&execution.error)
			.bind(id)
			.bind(expected.as_str())
			.bind(execution.status.as_str())
			.execute(&self.pool)
			.await?;

			if written.rows_affected() == 1 {
				return Ok(execution);
			}
			tracing::debug!(execution_id = id, "execution changed concurrently, re-validating update");
		}
	}

	#[tracing::instrument(skip(self))]
	async fn get_job_execution_by_id(&self, id: &str) -> Result<Option<JobExecution>> {
		self.fetch_execution(id).await
	}

	#[tracing::instrument(skip(self, parameters))]
	async fn get_last_job_execution(
		&self,
		job_name: &str,
		parameters: &JobParameters,
	) -> Result<Option<JobExecution>> {
		let canonical = parameters.to_canonical_json()?;
		let row = sqlx::query_as::<_, ExecutionRow>(&format!(
			"{SELECT_EXECUTION} WHERE e.job_name = ? AND e.parameters = ? ORDER BY e.seq DESC LIMIT 1"
		))
		.bind(job_name)
		.bind(&canonical)
		.fetch_optional(&self.pool)
		.await?;
		row.map(row_to_execution).transpose()
	}

	async fn get_job_execution_progress(&self, id: &str) -> Result<JobExecutionProgress> {
		let row = sqlx::query_as::<_, (String, i64, i64)>(
			"SELECT status, progress_current, progress_total FROM job_executions WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		let (status, current, total) =
			row.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))?;
		Ok(JobExecutionProgress {
			status: status.parse().map_err(JobError::Failed)?,
			progress: JobProgress::new(current.max(0) as u64, total.max(0) as u64),
		})
	}

	#[tracing::instrument(skip(self))]
	async fn save_job_execution_flag(&self, id: &str, flag: JobExecutionFlag) -> Result<()> {
		let required_status = match flag {
			JobExecutionFlag::Stop => Some(JobStatus::Running.as_str()),
			JobExecutionFlag::None => None,
		};
		let written = sqlx::query(
			r#"
			INSERT INTO job_execution_flags (execution_id, flag)
			SELECT id, ? FROM job_executions
			WHERE id = ? AND (? IS NULL OR status = ?)
			ON CONFLICT(execution_id) DO UPDATE SET flag = excluded.flag
			"#,
		)
		.bind(flag.as_str())
		.bind(id)
		.bind(required_status)
		.bind(required_status)
		.execute(&self.pool)
		.await?;
		if written.rows_affected() > 0 {
			return Ok(());
		}

		let status = self.get_job_execution_progress(id).await?.status;
		Err(JobError::NotRunning {
			execution_id: id.to_string(),
			status,
		})
	}

	async fn get_job_execution_flag(&self, id: &str) -> Result<JobExecutionFlag> {
		let row = sqlx::query_as::<_, (Option<String>,)>(
			r#"
			SELECT f.flag
			FROM job_executions e
			LEFT JOIN job_execution_flags f ON f.execution_id = e.id
			WHERE e.id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		let (flag,) = row.ok_or_else(|| JobError::ExecutionNotFound(id.to_string()))?;
		match flag {
			Some(flag) => flag.parse().map_err(JobError::Failed),
			None => Ok(JobExecutionFlag::None),
		}
	}

	async fn get_job_execution_data(&self, id: &str) -> Result<Option<String>> {
		let row = sqlx::query_as::<_, (String,)>(
			"SELECT data FROM job_execution_data WHERE execution_id = ?",
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|(data,)| data))
	}

	#[tracing::instrument(skip(self))]
	async fn find_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"{SELECT_EXECUTION} WHERE e.job_name = ? ORDER BY e.seq DESC"
		))
		.bind(job_name)
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(row_to_execution).collect()
	}

	#[tracing::instrument(skip(self))]
	async fn remove_job_execution(&self, id: &str) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let removed = sqlx::query("DELETE FROM job_executions WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		if removed.rows_affected() == 0 {
			return Err(JobError::ExecutionNotFound(id.to_string()));
		}
		sqlx::query("DELETE FROM job_execution_flags WHERE execution_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM job_execution_data WHERE execution_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn clear(&self) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM job_execution_flags")
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM job_execution_data")
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM job_executions")
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}
}
