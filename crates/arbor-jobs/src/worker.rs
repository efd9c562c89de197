// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Isolated execution context for jobs.
//!
//! The worker runs on its own OS thread with a single-threaded runtime. The only
//! state it shares with the caller is the repository; everything else crosses
//! the boundary as encoded strings, so the worker never sees the caller's
//! in-memory objects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use arbor_tree::DecisionModel;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{JsonCodec, MessageCodec};
use crate::context::CancellationToken;
use crate::error::{JobError, Result};
use crate::executor;
use crate::job::Job;
use crate::repository::JobRepository;
use crate::types::{JobEvent, JobEventKind, JobExecution, JobStatus};

/// Caller to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
	#[serde(rename_all = "camelCase")]
	Execute {
		request_id: u64,
		execution_id: String,
	},
	Shutdown,
}

/// Worker to caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
	#[serde(rename_all = "camelCase")]
	Reply {
		request_id: u64,
		outcome: WorkerReply,
	},
	Event { event: JobEvent },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkerReply {
	/// The execution is RUNNING inside the worker.
	Started { execution: JobExecution },
	Rejected { message: String },
}

/// Codecs used on both sides of the worker boundary.
#[derive(Clone)]
pub struct WorkerCodecs {
	pub requests: Arc<dyn MessageCodec<WorkerRequest>>,
	pub messages: Arc<dyn MessageCodec<WorkerMessage>>,
	pub snapshot: Arc<dyn MessageCodec<DecisionModel>>,
}

impl Default for WorkerCodecs {
	fn default() -> Self {
		Self {
			requests: Arc::new(JsonCodec::<WorkerRequest>::new()),
			messages: Arc::new(JsonCodec::<WorkerMessage>::new()),
			snapshot: Arc::new(JsonCodec::<DecisionModel>::new()),
		}
	}
}

type EventHandler = Arc<dyn Fn(&JobExecution) + Send + Sync>;
type EventHandlers = Arc<RwLock<HashMap<JobEventKind, Vec<EventHandler>>>>;
type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<JobExecution>>>>>;

/// Caller-side handle of the worker.
pub struct JobWorker {
	requests_tx: mpsc::UnboundedSender<String>,
	request_codec: Arc<dyn MessageCodec<WorkerRequest>>,
	pending: PendingReplies,
	in_flight: Arc<Mutex<HashSet<String>>>,
	handlers: EventHandlers,
	next_request_id: AtomicU64,
	reply_timeout: Duration,
	thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
	dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl JobWorker {
	/// Start the worker thread. Must be called from within a tokio runtime,
	/// which hosts the task that routes worker messages back to the caller.
	pub fn spawn(
		repository: Arc<dyn JobRepository>,
		codecs: WorkerCodecs,
		reply_timeout: Duration,
	) -> Result<Self> {
		let (requests_tx, requests_rx) = mpsc::unbounded_channel();
		let (messages_tx, messages_rx) = mpsc::unbounded_channel();

		let runtime = WorkerRuntime {
			repository,
			request_codec: codecs.requests.clone(),
			message_codec: codecs.messages.clone(),
			snapshot_codec: codecs.snapshot.clone(),
			outbox: messages_tx,
			shutdown: CancellationToken::new(),
		};
		let thread = std::thread::Builder::new()
			.name("arbor-job-worker".to_string())
			.spawn(move || runtime.run_blocking(requests_rx))
			.map_err(|e| JobError::Worker(format!("failed to start worker thread: {e}")))?;

		let pending: PendingReplies = Arc::default();
		let in_flight: Arc<Mutex<HashSet<String>>> = Arc::default();
		let handlers: EventHandlers = Arc::default();
		let dispatcher = tokio::spawn(route_messages(
			messages_rx,
			codecs.messages,
			pending.clone(),
			in_flight.clone(),
			handlers.clone(),
		));

		info!(reply_timeout_ms = reply_timeout.as_millis() as u64, "job worker started");
		Ok(Self {
			requests_tx,
			request_codec: codecs.requests,
			pending,
			in_flight,
			handlers,
			next_request_id: AtomicU64::new(1),
			reply_timeout,
			thread: std::sync::Mutex::new(Some(thread)),
			dispatcher: std::sync::Mutex::new(Some(dispatcher)),
		})
	}

	/// Register a handler for one lifecycle event posted by the worker.
	pub fn add_listener<F>(&self, kind: JobEventKind, handler: F)
	where
		F: Fn(&JobExecution) + Send + Sync + 'static,
	{
		self.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(kind)
			.or_default()
			.push(Arc::new(handler));
	}

	/// Ask the worker to run a NEW execution. Resolves once it is RUNNING there.
	#[instrument(skip(self))]
	pub async fn execute(&self, execution_id: &str) -> Result<JobExecution> {
		let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
		let raw = self.request_codec.encode(&WorkerRequest::Execute {
			request_id,
			execution_id: execution_id.to_string(),
		})?;

		if !self.in_flight.lock().await.insert(execution_id.to_string()) {
			return Err(JobError::AlreadyRunning(execution_id.to_string()));
		}
		let (reply_tx, reply_rx) = oneshot::channel();
		self.pending.lock().await.insert(request_id, reply_tx);

		if self.requests_tx.send(raw).is_err() {
			self.forget(request_id, execution_id).await;
			return Err(JobError::Worker("worker is not running".to_string()));
		}

		match tokio::time::timeout(self.reply_timeout, reply_rx).await {
			Ok(Ok(Ok(execution))) => Ok(execution),
			Ok(Ok(Err(e))) => {
				self.in_flight.lock().await.remove(execution_id);
				Err(e)
			}
			Ok(Err(_)) => {
				self.forget(request_id, execution_id).await;
				Err(JobError::Worker(
					"worker channel closed before replying".to_string(),
				))
			}
			Err(_) => {
				// A late Started reply marks the execution in flight again.
				self.forget(request_id, execution_id).await;
				warn!(request_id, "no reply from worker");
				Err(JobError::Worker(format!(
					"no reply from worker within {} ms",
					self.reply_timeout.as_millis()
				)))
			}
		}
	}

	/// Whether the worker holds a live executor for this execution.
	pub async fn is_executing(&self, execution_id: &str) -> bool {
		self.in_flight.lock().await.contains(execution_id)
	}

	/// Stop the worker, letting running jobs wind down at their next checkpoint.
	pub async fn shutdown(&self) {
		if let Ok(raw) = self.request_codec.encode(&WorkerRequest::Shutdown) {
			let _ = self.requests_tx.send(raw);
		}

		let thread = self
			.thread
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(thread) = thread {
			match tokio::task::spawn_blocking(move || thread.join()).await {
				Ok(Ok(())) => info!("job worker stopped"),
				Ok(Err(_)) => error!("job worker thread panicked"),
				Err(e) => error!(error = %e, "failed to join job worker thread"),
			}
		}

		let dispatcher = self
			.dispatcher
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(dispatcher) = dispatcher {
			if let Err(e) = dispatcher.await {
				error!(error = %e, "worker message router panicked");
			}
		}
	}

	async fn forget(&self, request_id: u64, execution_id: &str) {
		self.pending.lock().await.remove(&request_id);
		self.in_flight.lock().await.remove(execution_id);
	}
}

/// Caller-side task: resolves pending replies and fans events out to handlers.
async fn route_messages(
	mut messages: mpsc::UnboundedReceiver<String>,
	codec: Arc<dyn MessageCodec<WorkerMessage>>,
	pending: PendingReplies,
	in_flight: Arc<Mutex<HashSet<String>>>,
	handlers: EventHandlers,
) {
	while let Some(raw) = messages.recv().await {
		let message = match codec.decode(&raw) {
			Ok(message) => message,
			Err(e) => {
				warn!(error = %e, "dropping undecodable worker message");
				continue;
			}
		};

		match message {
			WorkerMessage::Reply {
				request_id,
				outcome,
			} => {
				let Some(reply_tx) = pending.lock().await.remove(&request_id) else {
					debug!(request_id, "reply for unknown or expired request");
					if let WorkerReply::Started { execution } = outcome {
						in_flight.lock().await.insert(execution.id);
					}
					continue;
				};
				let result = match outcome {
					WorkerReply::Started { execution } => Ok(execution),
					WorkerReply::Rejected { message } => Err(JobError::Worker(message)),
				};
				let _ = reply_tx.send(result);
			}
			WorkerMessage::Event { event } => {
				if let JobEvent::AfterJob(execution) = &event {
					in_flight.lock().await.remove(&execution.id);
				}
				let registered = handlers
					.read()
					.unwrap_or_else(PoisonError::into_inner)
					.get(&event.kind())
					.cloned()
					.unwrap_or_default();
				for handler in registered {
					handler(event.execution());
				}
			}
		}
	}

	pending.lock().await.clear();
	debug!("worker message channel closed");
}

/// Worker-side state. Lives on the worker thread only.
#[derive(Clone)]
struct WorkerRuntime {
	repository: Arc<dyn JobRepository>,
	request_codec: Arc<dyn MessageCodec<WorkerRequest>>,
	message_codec: Arc<dyn MessageCodec<WorkerMessage>>,
	snapshot_codec: Arc<dyn MessageCodec<DecisionModel>>,
	outbox: mpsc::UnboundedSender<String>,
	shutdown: CancellationToken,
}

impl WorkerRuntime {
	fn run_blocking(self, requests: mpsc::UnboundedReceiver<String>) {
		let runtime = match tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
		{
			Ok(runtime) => runtime,
			Err(e) => {
				error!(error = %e, "failed to build worker runtime");
				return;
			}
		};
		runtime.block_on(self.run(requests));
	}

	async fn run(self, mut requests: mpsc::UnboundedReceiver<String>) {
		let mut tasks = JoinSet::new();

		loop {
			tokio::select! {
				raw = requests.recv() => {
					let Some(raw) = raw else {
						break;
					};
					match self.request_codec.decode(&raw) {
						Ok(WorkerRequest::Execute { request_id, execution_id }) => {
							self.handle_execute(request_id, execution_id, &mut tasks).await;
						}
						Ok(WorkerRequest::Shutdown) => break,
						Err(e) => warn!(error = %e, "dropping undecodable worker request"),
					}
				}
				Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
					if let Err(e) = joined {
						error!(error = %e, "worker job task panicked");
					}
				}
			}
		}

		info!(running = tasks.len(), "job worker shutting down");
		self.shutdown.cancel();
		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				error!(error = %e, "worker job task panicked");
			}
		}
	}

	async fn handle_execute(
		&self,
		request_id: u64,
		execution_id: String,
		tasks: &mut JoinSet<()>,
	) {
		match self.begin(&execution_id).await {
			Ok((job, running, data)) => {
				// Reply first so the caller resolves before any lifecycle event arrives.
				self.post(&WorkerMessage::Reply {
					request_id,
					outcome: WorkerReply::Started {
						execution: running.clone(),
					},
				});
				self.post(&WorkerMessage::Event {
					event: JobEvent::BeforeJob(running.clone()),
				});
				let worker = self.clone();
				tasks.spawn(async move { worker.finish(job, running, data).await });
			}
			Err(e) => {
				warn!(execution_id = %execution_id, error = %e, "worker rejected execution");
				self.post(&WorkerMessage::Reply {
					request_id,
					outcome: WorkerReply::Rejected {
						message: e.to_string(),
					},
				});
			}
		}
	}

	async fn begin(&self, execution_id: &str) -> Result<(Arc<dyn Job>, JobExecution, String)> {
		let execution = self
			.repository
			.get_job_execution_by_id(execution_id)
			.await?
			.ok_or_else(|| JobError::ExecutionNotFound(execution_id.to_string()))?;
		if execution.status != JobStatus::New {
			return Err(JobError::InvalidState {
				execution_id: execution.id,
				status: execution.status,
			});
		}
		let job = self.repository.get_job_by_name(&execution.job_name).await?;
		let data = self
			.repository
			.get_job_execution_data(execution_id)
			.await?
			.ok_or_else(|| JobError::Codec(format!("no snapshot stored for execution {execution_id}")))?;
		let running = executor::begin(self.repository.as_ref(), execution_id).await?;
		Ok((job, running, data))
	}

	async fn finish(self, job: Arc<dyn Job>, running: JobExecution, data: String) {
		let finished = match executor::complete(
			job,
			self.repository.clone(),
			&running,
			&data,
			self.snapshot_codec.as_ref(),
			self.shutdown.clone(),
		)
		.await
		{
			Ok(finished) => finished,
			Err(e) => {
				error!(execution_id = %running.id, error = %e, "failed to record job outcome");
				self.repository
					.get_job_execution_by_id(&running.id)
					.await
					.ok()
					.flatten()
					.unwrap_or(running)
			}
		};
		self.post(&WorkerMessage::Event {
			event: JobEvent::AfterJob(finished),
		});
	}

	fn post(&self, message: &WorkerMessage) {
		match self.message_codec.encode(message) {
			Ok(raw) => {
				if self.outbox.send(raw).is_err() {
					warn!("worker outbox closed, dropping message");
				}
			}
			Err(e) => error!(error = %e, "failed to encode worker message"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::MemoryJobRepository;
	use crate::testing::{linear_model, StaticJob};
	use serde_json::json;

	struct BrokenCodec;

	impl MessageCodec<WorkerMessage> for BrokenCodec {
		fn encode(&self, _value: &WorkerMessage) -> Result<String> {
			Ok("garbage".to_string())
		}

		fn decode(&self, _raw: &str) -> Result<WorkerMessage> {
			Err(JobError::Codec("cannot decode".to_string()))
		}
	}

	async fn new_execution(repository: &Arc<dyn JobRepository>) -> JobExecution {
		let job = repository.get_job_by_name("static").await.unwrap();
		let params = job.create_job_parameters(&json!({})).unwrap();
		let data = JsonCodec::<DecisionModel>::new()
			.encode(&linear_model())
			.unwrap();
		repository
			.create_job_execution("static", params, Some(data))
			.await
			.unwrap()
	}

	async fn repository() -> Arc<dyn JobRepository> {
		let repository: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
		repository
			.register_job(Arc::new(StaticJob::new("static").with_result(json!({"ok": true}))))
			.await
			.unwrap();
		repository
	}

	#[test]
	fn test_request_wire_format() {
		let raw = serde_json::to_value(WorkerRequest::Execute {
			request_id: 7,
			execution_id: "abc".to_string(),
		})
		.unwrap();
		assert_eq!(
			raw,
			json!({"type": "execute", "requestId": 7, "executionId": "abc"})
		);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn test_execute_reports_events_in_order() {
		let repository = repository().await;
		let worker = JobWorker::spawn(
			repository.clone(),
			WorkerCodecs::default(),
			Duration::from_secs(5),
		)
		.unwrap();

		let (events_tx, mut events_rx) = mpsc::unbounded_channel();
		for kind in [JobEventKind::BeforeJob, JobEventKind::AfterJob] {
			let events_tx = events_tx.clone();
			worker.add_listener(kind, move |execution| {
				let _ = events_tx.send((kind, execution.status));
			});
		}

		let execution = new_execution(&repository).await;
		let running = worker.execute(&execution.id).await.unwrap();
		assert_eq!(running.status, JobStatus::Running);

		assert_eq!(
			events_rx.recv().await.unwrap(),
			(JobEventKind::BeforeJob, JobStatus::Running)
		);
		assert_eq!(
			events_rx.recv().await.unwrap(),
			(JobEventKind::AfterJob, JobStatus::Finished)
		);
		assert!(!worker.is_executing(&execution.id).await);

		let stored = repository
			.get_job_execution_by_id(&execution.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.result, Some(json!({"ok": true})));

		worker.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn test_rejects_unknown_execution() {
		let repository = repository().await;
		let worker = JobWorker::spawn(
			repository.clone(),
			WorkerCodecs::default(),
			Duration::from_secs(5),
		)
		.unwrap();

		let result = worker.execute("missing").await;
		assert!(matches!(result, Err(JobError::Worker(_))));
		assert!(!worker.is_executing("missing").await);

		worker.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn test_undecodable_reply_times_out() {
		let repository = repository().await;
		let codecs = WorkerCodecs {
			messages: Arc::new(BrokenCodec),
			..WorkerCodecs::default()
		};
		let worker = JobWorker::spawn(repository.clone(), codecs, Duration::from_millis(200)).unwrap();

		let execution = new_execution(&repository).await;
		let result = worker.execute(&execution.id).await;
		assert!(matches!(result, Err(JobError::Worker(message)) if message.contains("no reply")));
		assert!(!worker.is_executing(&execution.id).await);
		assert!(worker.in_flight.lock().await.is_empty());

		worker.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn test_concurrent_execute_starts_once() {
		let repository = repository().await;
		let worker = JobWorker::spawn(
			repository.clone(),
			WorkerCodecs::default(),
			Duration::from_secs(5),
		)
		.unwrap();
		let before = Arc::new(AtomicU64::new(0));
		let counter = before.clone();
		worker.add_listener(JobEventKind::BeforeJob, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		let execution = new_execution(&repository).await;
		let (first, second) = tokio::join!(worker.execute(&execution.id), worker.execute(&execution.id));
		assert_eq!([&first, &second].iter().filter(|r| r.is_ok()).count(), 1);
		let loser = if first.is_ok() { second } else { first };
		assert!(matches!(
			loser,
			Err(JobError::AlreadyRunning(_)) | Err(JobError::Worker(_))
		));

		worker.shutdown().await;
		assert_eq!(before.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn test_execute_after_shutdown_fails() {
		let repository = repository().await;
		let worker = JobWorker::spawn(
			repository.clone(),
			WorkerCodecs::default(),
			Duration::from_secs(5),
		)
		.unwrap();
		worker.shutdown().await;

		let execution = new_execution(&repository).await;
		let result = worker.execute(&execution.id).await;
		assert!(matches!(result, Err(JobError::Worker(_))));
	}
}
