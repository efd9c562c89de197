// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sensitivity analysis (sweep) configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
	/// Registered job name.
	pub job_name: String,
	/// Rows evaluated between two checkpoints when the caller gives no batch size.
	pub default_batch_size: usize,
	/// Upper bound on the number of parameter combinations of one run.
	pub max_combinations: usize,
}

impl Default for SweepConfig {
	fn default() -> Self {
		Self {
			job_name: "sensitivity-analysis".to_string(),
			default_batch_size: 100,
			max_combinations: 1_000_000,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SweepConfigLayer {
	#[serde(default)]
	pub job_name: Option<String>,
	#[serde(default)]
	pub default_batch_size: Option<usize>,
	#[serde(default)]
	pub max_combinations: Option<usize>,
}

impl SweepConfigLayer {
	pub fn merge(&mut self, other: SweepConfigLayer) {
		if other.job_name.is_some() {
			self.job_name = other.job_name;
		}
		if other.default_batch_size.is_some() {
			self.default_batch_size = other.default_batch_size;
		}
		if other.max_combinations.is_some() {
			self.max_combinations = other.max_combinations;
		}
	}

	pub fn finalize(self) -> SweepConfig {
		let defaults = SweepConfig::default();
		SweepConfig {
			job_name: self.job_name.unwrap_or(defaults.job_name),
			default_batch_size: self
				.default_batch_size
				.unwrap_or(defaults.default_batch_size),
			max_combinations: self.max_combinations.unwrap_or(defaults.max_combinations),
		}
	}
}
