// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job repository configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:./arbor-jobs.db";

/// Storage backend for job executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryBackend {
	/// Volatile, lost when the process exits.
	#[default]
	Memory,
	/// Durable SQLite database.
	Sqlite,
}

impl RepositoryBackend {
	pub fn as_str(&self) -> &'static str {
		match self {
			RepositoryBackend::Memory => "memory",
			RepositoryBackend::Sqlite => "sqlite",
		}
	}
}

impl std::fmt::Display for RepositoryBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RepositoryBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"memory" => Ok(RepositoryBackend::Memory),
			"sqlite" => Ok(RepositoryBackend::Sqlite),
			_ => Err(format!("unknown repository backend: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
	pub backend: RepositoryBackend,
	pub database_url: String,
}

impl Default for RepositoryConfig {
	fn default() -> Self {
		Self {
			backend: RepositoryBackend::Memory,
			database_url: DEFAULT_DATABASE_URL.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepositoryConfigLayer {
	#[serde(default)]
	pub backend: Option<RepositoryBackend>,
	#[serde(default)]
	pub database_url: Option<String>,
}

impl RepositoryConfigLayer {
	pub fn merge(&mut self, other: RepositoryConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
	}

	pub fn finalize(self) -> RepositoryConfig {
		RepositoryConfig {
			backend: self.backend.unwrap_or_default(),
			database_url: self
				.database_url
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = RepositoryConfigLayer::default().finalize();
		assert_eq!(config.backend, RepositoryBackend::Memory);
		assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
	}

	#[test]
	fn test_backend_parse() {
		assert_eq!(
			"SQLite".parse::<RepositoryBackend>().unwrap(),
			RepositoryBackend::Sqlite
		);
		assert!("idb".parse::<RepositoryBackend>().is_err());
	}

	#[test]
	fn test_deserialize_layer() {
		let layer: RepositoryConfigLayer = toml::from_str(
			r#"
backend = "sqlite"
database_url = "sqlite:/var/lib/arbor/jobs.db"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.backend, RepositoryBackend::Sqlite);
		assert_eq!(config.database_url, "sqlite:/var/lib/arbor/jobs.db");
	}
}
