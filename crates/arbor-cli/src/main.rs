// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Arbor command line: run and manage sensitivity sweeps over decision models.

use std::path::{Path, PathBuf};

use anyhow::Context;
use arbor_jobs::{JobExecution, JobsManager, StopOutcome};
use arbor_jobs_config::{JobsConfig, RepositoryBackend};
use arbor_tree::DecisionModel;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod sweep_args;

use sweep_args::{sweep_values, VariableArg};

/// Arbor - decision model analysis jobs.
#[derive(Parser, Debug)]
#[command(name = "arbor", about = "Run and manage Arbor analysis jobs", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/arbor/jobs.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Store executions in this SQLite database instead of the configured backend
	#[arg(long, global = true, env = "ARBOR_DATABASE_URL")]
	database_url: Option<String>,

	/// Run jobs on the isolated worker thread
	#[arg(long, global = true)]
	worker: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Sweep variables of a model and wait for the result
	Run {
		/// Decision model as JSON
		#[arg(long)]
		model: PathBuf,
		#[command(flatten)]
		sweep: SweepArgs,
	},
	/// Show a stored execution
	Status { id: String },
	/// Request a running execution to stop
	Stop { id: String },
	/// Delete an execution that is not running here
	Discard { id: String },
	/// Replace an orphaned running execution with a fresh run and wait for it
	Rerun { id: String },
	/// Show the most recent execution with the given sweep parameters
	Last {
		#[command(flatten)]
		sweep: SweepArgs,
	},
	/// List executions of the sweep job, newest first
	List,
	/// Show version information
	Version,
}

#[derive(clap::Args, Debug)]
struct SweepArgs {
	/// Variable range as name=min:max:length or name=min:max/step (repeatable)
	#[arg(long = "var", required = true)]
	variables: Vec<VariableArg>,

	/// Objective rule (max, min, expected-value-maximization, expected-value-minimization)
	#[arg(long)]
	rule: Option<String>,

	/// Combinations evaluated between progress reports
	#[arg(long)]
	batch_size: Option<u64>,
}

impl SweepArgs {
	fn values(&self) -> serde_json::Value {
		sweep_values(&self.variables, self.rule.as_deref(), self.batch_size)
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("arbor {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let mut config = match &args.config {
		Some(path) => arbor_jobs_config::load_config_with_file(path)?,
		None => arbor_jobs_config::load_config()?,
	};
	if let Some(url) = &args.database_url {
		config.repository.backend = RepositoryBackend::Sqlite;
		config.repository.database_url = url.clone();
	}
	if args.worker {
		config.worker.enabled = true;
	}

	// Logs go to stderr so stdout carries only JSON output.
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	tracing::debug!(
		backend = %config.repository.backend,
		worker = config.worker.enabled,
		"starting arbor"
	);

	let manager = JobsManager::from_config(&config).await?;
	let outcome = run_command(&manager, &config, args.command).await;
	manager.shutdown().await;
	outcome
}

async fn run_command(manager: &JobsManager, config: &JobsConfig, command: Command) -> anyhow::Result<()> {
	let job_name = config.sweep.job_name.as_str();
	match command {
		Command::Run { model, sweep } => {
			let model = read_model(&model)?;
			let execution = manager.run(job_name, &sweep.values(), &model).await?;
			tracing::info!(execution_id = %execution.id, "sweep started");
			let finished = wait_or_interrupt(manager, &execution.id).await?;
			print_json(&finished)
		}
		Command::Status { id } => print_json(&manager.get_job_execution(&id).await?),
		Command::Stop { id } => match manager.stop(&id).await? {
			StopOutcome::Requested(execution) => print_json(&execution),
			StopOutcome::NotRunning(execution) => {
				tracing::warn!(execution_id = %id, status = %execution.status, "execution is not running");
				print_json(&execution)
			}
		},
		Command::Discard { id } => print_json(&manager.discard(&id).await?),
		Command::Rerun { id } => {
			let execution = manager.rerun(&id).await?;
			tracing::info!(stale_id = %id, execution_id = %execution.id, "execution re-run");
			let finished = wait_or_interrupt(manager, &execution.id).await?;
			print_json(&finished)
		}
		Command::Last { sweep } => {
			let last = manager
				.get_last_job_execution(job_name, &sweep.values())
				.await?;
			print_json(&last)
		}
		Command::List => {
			let executions = manager.repository().find_job_executions(job_name).await?;
			print_json(&executions)
		}
		Command::Version => Ok(()),
	}
}

/// Wait for the execution, turning Ctrl-C into a stop request.
async fn wait_or_interrupt(manager: &JobsManager, execution_id: &str) -> anyhow::Result<JobExecution> {
	tokio::select! {
		result = manager.wait_for_completion(execution_id) => Ok(result?),
		_ = tokio::signal::ctrl_c() => {
			tracing::warn!(execution_id, "interrupted, requesting stop");
			manager.stop(execution_id).await?;
			Ok(manager.wait_for_completion(execution_id).await?)
		}
	}
}

fn read_model(path: &Path) -> anyhow::Result<DecisionModel> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read model {}", path.display()))?;
	let model: DecisionModel = serde_json::from_str(&raw)
		.with_context(|| format!("failed to parse model {}", path.display()))?;
	model.validate()?;
	Ok(model)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use arbor_tree::ObjectiveRule;
	use clap::CommandFactory;

	#[test]
	fn test_rule_help_lists_accepted_names() {
		let command = Args::command();
		let run = command.find_subcommand("run").unwrap();
		let help = run
			.get_arguments()
			.find(|arg| arg.get_id() == "rule")
			.and_then(|arg| arg.get_help())
			.unwrap()
			.to_string();

		let names = help
			.split_once('(')
			.and_then(|(_, rest)| rest.split_once(')'))
			.map(|(names, _)| names)
			.unwrap();
		for name in names.split(',').map(str::trim) {
			assert!(name.parse::<ObjectiveRule>().is_ok(), "help lists unknown rule '{name}'");
		}
	}

	#[test]
	fn test_run_args_parse() {
		let args = Args::try_parse_from([
			"arbor", "run", "--model", "model.json", "--var", "x=0:1:2", "--rule", "min",
		])
		.unwrap();
		assert!(matches!(args.command, Command::Run { .. }));
	}
}
