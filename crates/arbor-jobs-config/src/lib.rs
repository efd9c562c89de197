// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Arbor job engine.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`ARBOR_JOBS_*`)
//!
//! # Usage
//!
//! ```ignore
//! use arbor_jobs_config::load_config;
//!
//! let config = load_config()?;
//! println!("storing executions in {}", config.repository.backend);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::JobsConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved job engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobsConfig {
	pub repository: RepositoryConfig,
	pub worker: WorkerConfig,
	pub launcher: LauncherConfig,
	pub sweep: SweepConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`ARBOR_JOBS_*`)
/// 2. Config file (`/etc/arbor/jobs.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<JobsConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<JobsConfig, ConfigError> {
	load_from_sources(vec![Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<JobsConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<JobsConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = JobsConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: JobsConfigLayer) -> Result<JobsConfig, ConfigError> {
	let config = JobsConfig {
		repository: layer.repository.unwrap_or_default().finalize(),
		worker: layer.worker.unwrap_or_default().finalize(),
		launcher: layer.launcher.unwrap_or_default().finalize(),
		sweep: layer.sweep.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		backend = %config.repository.backend,
		worker_enabled = config.worker.enabled,
		duplicate_policy = ?config.launcher.duplicate_policy,
		sweep_job = %config.sweep.job_name,
		"Job engine configuration loaded"
	);

	Ok(config)
}

fn validate_config(config: &JobsConfig) -> Result<(), ConfigError> {
	if config.sweep.default_batch_size == 0 {
		return Err(ConfigError::Validation(
			"sweep.default_batch_size must be at least 1".to_string(),
		));
	}
	if config.sweep.max_combinations == 0 {
		return Err(ConfigError::Validation(
			"sweep.max_combinations must be at least 1".to_string(),
		));
	}
	if config.worker.enabled && config.worker.reply_timeout_ms == 0 {
		return Err(ConfigError::Validation(
			"worker.reply_timeout_ms must be positive when the worker is enabled".to_string(),
		));
	}
	if config.sweep.job_name.trim().is_empty() {
		return Err(ConfigError::Validation(
			"sweep.job_name must not be empty".to_string(),
		));
	}
	Ok(())
}
