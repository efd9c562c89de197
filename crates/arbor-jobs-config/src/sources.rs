// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::JobsConfigLayer;
use crate::sections::{
	LauncherConfigLayer, LoggingConfigLayer, RepositoryConfigLayer, SweepConfigLayer,
	WorkerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<JobsConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(JobsConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/arbor/jobs.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(JobsConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: JobsConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: ARBOR_JOBS_<SECTION>_<FIELD>, matching the TOML keys.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(JobsConfigLayer {
			repository: Some(RepositoryConfigLayer {
				backend: env_parse("ARBOR_JOBS_REPOSITORY_BACKEND")?,
				database_url: env_var("ARBOR_JOBS_REPOSITORY_DATABASE_URL"),
			}),
			worker: Some(WorkerConfigLayer {
				enabled: env_bool("ARBOR_JOBS_WORKER_ENABLED"),
				reply_timeout_ms: env_parse("ARBOR_JOBS_WORKER_REPLY_TIMEOUT_MS")?,
			}),
			launcher: Some(LauncherConfigLayer {
				duplicate_policy: env_parse("ARBOR_JOBS_LAUNCHER_DUPLICATE_POLICY")?,
			}),
			sweep: Some(SweepConfigLayer {
				job_name: env_var("ARBOR_JOBS_SWEEP_JOB_NAME"),
				default_batch_size: env_parse("ARBOR_JOBS_SWEEP_DEFAULT_BATCH_SIZE")?,
				max_combinations: env_parse("ARBOR_JOBS_SWEEP_MAX_COMBINATIONS")?,
			}),
			logging: Some(LoggingConfigLayer {
				level: env_var("ARBOR_JOBS_LOGGING_LEVEL"),
			}),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}': {e}"),
		}),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::RepositoryBackend;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.repository.is_none());
		assert!(layer.worker.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let source = TomlSource::new("/nonexistent/jobs.toml");
		let layer = source.load().unwrap();
		assert!(layer.repository.is_none());
	}

	#[test]
	fn test_toml_source_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[repository]
backend = "sqlite"

[sweep]
default_batch_size = 25
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(
			layer.repository.unwrap().backend,
			Some(RepositoryBackend::Sqlite)
		);
		assert_eq!(layer.sweep.unwrap().default_batch_size, Some(25));
	}

	#[test]
	fn test_toml_source_parse_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[repository\nbackend = ").unwrap();

		let result = TomlSource::new(file.path()).load();
		assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
	}

	/// Process-wide variables, so every environment case lives in this one test.
	#[test]
	fn test_env_overrides_toml_file() {
		const VARS: [(&str, &str); 9] = [
			("ARBOR_JOBS_REPOSITORY_BACKEND", "sqlite"),
			("ARBOR_JOBS_REPOSITORY_DATABASE_URL", "sqlite:/tmp/arbor-env.db"),
			("ARBOR_JOBS_WORKER_ENABLED", "true"),
			("ARBOR_JOBS_WORKER_REPLY_TIMEOUT_MS", "1500"),
			("ARBOR_JOBS_LAUNCHER_DUPLICATE_POLICY", "reject"),
			("ARBOR_JOBS_SWEEP_JOB_NAME", "sweep"),
			("ARBOR_JOBS_SWEEP_DEFAULT_BATCH_SIZE", "7"),
			("ARBOR_JOBS_SWEEP_MAX_COMBINATIONS", "500"),
			("ARBOR_JOBS_LOGGING_LEVEL", "debug"),
		];

		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[repository]
backend = "memory"

[sweep]
default_batch_size = 25
max_combinations = 1000
"#
		)
		.unwrap();

		for (name, value) in VARS {
			std::env::set_var(name, value);
		}
		let loaded = crate::load_config_with_file(file.path());

		std::env::set_var("ARBOR_JOBS_SWEEP_DEFAULT_BATCH_SIZE", "many");
		let invalid = EnvSource.load();

		for (name, _) in VARS {
			std::env::remove_var(name);
		}

		let config = loaded.unwrap();
		assert_eq!(config.repository.backend, RepositoryBackend::Sqlite);
		assert_eq!(config.repository.database_url, "sqlite:/tmp/arbor-env.db");
		assert!(config.worker.enabled);
		assert_eq!(config.worker.reply_timeout_ms, 1500);
		assert_eq!(
			config.launcher.duplicate_policy,
			crate::sections::DuplicateRunPolicy::Reject
		);
		assert_eq!(config.sweep.job_name, "sweep");
		assert_eq!(config.sweep.default_batch_size, 7);
		assert_eq!(config.sweep.max_combinations, 500);
		assert_eq!(config.logging.level, "debug");

		assert!(matches!(
			invalid,
			Err(ConfigError::InvalidValue { ref key, .. }) if key == "ARBOR_JOBS_SWEEP_DEFAULT_BATCH_SIZE"
		));
	}
}
