// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Asynchronous job execution engine for Arbor.
//!
//! Long-running computations over a decision model (such as sensitivity
//! analysis sweeps) run as jobs. Each run is a persisted execution that moves
//! through `new -> running -> finished | failed | stopped`, reports monotonic
//! progress, and can be stopped cooperatively. Executions run in process or on
//! an isolated worker thread, and are stored in memory or in SQLite.

pub mod codec;
pub mod context;
pub mod error;
mod executor;
pub mod job;
pub mod jobs;
pub mod launcher;
pub mod listener;
pub mod manager;
pub mod parameters;
pub mod repository;
pub mod testing;
pub mod types;
pub mod worker;

pub use codec::{JsonCodec, MessageCodec};
pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use job::{Job, JobOutcome};
pub use jobs::{SensitivityAnalysisJob, SweepParameters, SweepResult, SweepRow, VariableRange};
pub use launcher::{JobLauncher, StopOutcome};
pub use listener::{JobExecutionListener, ListenerRegistry};
pub use manager::JobsManager;
pub use parameters::JobParameters;
pub use repository::{
	create_pool, migrate, open_repository, JobRegistry, JobRepository, MemoryJobRepository,
	SqliteJobRepository,
};
pub use types::{
	JobEvent, JobEventKind, JobExecution, JobExecutionFlag, JobExecutionProgress,
	JobExecutionUpdate, JobProgress, JobStatus,
};
pub use worker::{JobWorker, WorkerCodecs, WorkerMessage, WorkerReply, WorkerRequest};
