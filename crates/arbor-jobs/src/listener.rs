// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{JobEvent, JobExecution};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observer of execution lifecycle events.
///
/// Callbacks run on the dispatching task and should return quickly.
pub trait JobExecutionListener: Send + Sync {
	fn before_job(&self, _execution: &JobExecution) {}
	fn after_job(&self, _execution: &JobExecution) {}
}

/// Fans lifecycle events out to registered listeners and broadcast subscribers.
pub struct ListenerRegistry {
	listeners: RwLock<Vec<Arc<dyn JobExecutionListener>>>,
	events_tx: broadcast::Sender<JobEvent>,
}

impl ListenerRegistry {
	pub fn new() -> Self {
		let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		Self {
			listeners: RwLock::new(Vec::new()),
			events_tx,
		}
	}

	pub fn register(&self, listener: Arc<dyn JobExecutionListener>) {
		self.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(listener);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.events_tx.subscribe()
	}

	pub fn dispatch(&self, event: &JobEvent) {
		debug!(
			event = event.kind().as_str(),
			execution_id = %event.execution().id,
			status = %event.execution().status,
			"dispatching job event"
		);
		let listeners = self
			.listeners
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		for listener in &listeners {
			match event {
				JobEvent::BeforeJob(execution) => listener.before_job(execution),
				JobEvent::AfterJob(execution) => listener.after_job(execution),
			}
		}
		// No subscribers is fine.
		let _ = self.events_tx.send(event.clone());
	}
}

impl Default for ListenerRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::RecordingListener;
	use crate::parameters::JobParameters;
	use std::collections::BTreeMap;

	#[tokio::test]
	async fn test_dispatch_reaches_listeners_and_subscribers() {
		let registry = ListenerRegistry::new();
		let listener = Arc::new(RecordingListener::default());
		registry.register(listener.clone());
		let mut events = registry.subscribe();

		let execution = JobExecution::new("job", JobParameters::new("job", BTreeMap::new()));
		registry.dispatch(&JobEvent::BeforeJob(execution.clone()));
		registry.dispatch(&JobEvent::AfterJob(execution.clone()));

		assert_eq!(
			listener.events(),
			vec![
				format!("beforeJob:{}", execution.id),
				format!("afterJob:{}", execution.id)
			]
		);
		assert!(matches!(events.recv().await.unwrap(), JobEvent::BeforeJob(_)));
		assert!(matches!(events.recv().await.unwrap(), JobEvent::AfterJob(_)));
	}
}
