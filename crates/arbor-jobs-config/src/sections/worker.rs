// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job worker configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
	/// Offload executions to the isolated worker context.
	pub enabled: bool,
	/// How long a dispatch waits for the worker to acknowledge a request.
	pub reply_timeout_ms: u64,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			reply_timeout_ms: 10_000,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkerConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub reply_timeout_ms: Option<u64>,
}

impl WorkerConfigLayer {
	pub fn merge(&mut self, other: WorkerConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.reply_timeout_ms.is_some() {
			self.reply_timeout_ms = other.reply_timeout_ms;
		}
	}

	pub fn finalize(self) -> WorkerConfig {
		let defaults = WorkerConfig::default();
		WorkerConfig {
			enabled: self.enabled.unwrap_or(defaults.enabled),
			reply_timeout_ms: self.reply_timeout_ms.unwrap_or(defaults.reply_timeout_ms),
		}
	}
}
