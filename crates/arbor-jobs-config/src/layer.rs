// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	LauncherConfigLayer, LoggingConfigLayer, RepositoryConfigLayer, SweepConfigLayer,
	WorkerConfigLayer,
};

/// Partial configuration produced by one source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobsConfigLayer {
	#[serde(default)]
	pub repository: Option<RepositoryConfigLayer>,
	#[serde(default)]
	pub worker: Option<WorkerConfigLayer>,
	#[serde(default)]
	pub launcher: Option<LauncherConfigLayer>,
	#[serde(default)]
	pub sweep: Option<SweepConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	let Some(incoming) = other else {
		return;
	};
	if let Some(existing) = base.as_mut() {
		merge(existing, incoming);
	} else {
		*base = Some(incoming);
	}
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: JobsConfigLayer) {
		merge_section(&mut self.repository, other.repository, RepositoryConfigLayer::merge);
		merge_section(&mut self.worker, other.worker, WorkerConfigLayer::merge);
		merge_section(&mut self.launcher, other.launcher, LauncherConfigLayer::merge);
		merge_section(&mut self.sweep, other.sweep, SweepConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::RepositoryBackend;

	#[test]
	fn test_merge_keeps_fields_missing_from_overlay() {
		let mut base: JobsConfigLayer = toml::from_str(
			r#"
[repository]
backend = "sqlite"
database_url = "sqlite:/tmp/base.db"
"#,
		)
		.unwrap();
		let overlay: JobsConfigLayer = toml::from_str(
			r#"
[repository]
database_url = "sqlite:/tmp/overlay.db"

[worker]
enabled = true
"#,
		)
		.unwrap();

		base.merge(overlay);

		let repository = base.repository.unwrap();
		assert_eq!(repository.backend, Some(RepositoryBackend::Sqlite));
		assert_eq!(
			repository.database_url.as_deref(),
			Some("sqlite:/tmp/overlay.db")
		);
		assert_eq!(base.worker.unwrap().enabled, Some(true));
	}
}
