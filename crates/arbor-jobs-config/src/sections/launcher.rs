// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launcher configuration.

use serde::{Deserialize, Serialize};

/// What the launcher does when a run is requested for a job and parameter set
/// whose most recent execution is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRunPolicy {
	/// Start another execution with a fresh id.
	#[default]
	Allow,
	/// Refuse the run.
	Reject,
}

impl std::str::FromStr for DuplicateRunPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"allow" => Ok(DuplicateRunPolicy::Allow),
			"reject" => Ok(DuplicateRunPolicy::Reject),
			_ => Err(format!("unknown duplicate run policy: {s}")),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LauncherConfig {
	pub duplicate_policy: DuplicateRunPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LauncherConfigLayer {
	#[serde(default)]
	pub duplicate_policy: Option<DuplicateRunPolicy>,
}

impl LauncherConfigLayer {
	pub fn merge(&mut self, other: LauncherConfigLayer) {
		if other.duplicate_policy.is_some() {
			self.duplicate_policy = other.duplicate_policy;
		}
	}

	pub fn finalize(self) -> LauncherConfig {
		LauncherConfig {
			duplicate_policy: self.duplicate_policy.unwrap_or_default(),
		}
	}
}
