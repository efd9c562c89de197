// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sensitivity analysis: evaluate a decision model over the Cartesian product of
//! variable ranges and tabulate the payoff and policy of every combination.

use std::collections::HashSet;

use arbor_jobs_config::SweepConfig;
use arbor_tree::{DecisionModel, ObjectiveRule, PolicyDecision, Scope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::job::{Job, JobOutcome};
use crate::parameters::JobParameters;

const MAX_PREALLOCATED_ROWS: u64 = 65_536;

/// One swept variable, normalized to `length` evenly spaced points over `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRange {
	pub name: String,
	pub min: f64,
	pub max: f64,
	pub length: usize,
}

impl VariableRange {
	pub fn points(&self) -> Vec<f64> {
		if self.length <= 1 {
			return vec![self.min];
		}
		let span = self.max - self.min;
		let intervals = (self.length - 1) as f64;
		(0..self.length)
			.map(|i| self.min + span * i as f64 / intervals)
			.collect()
	}
}

/// Normalized parameters of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepParameters {
	pub variables: Vec<VariableRange>,
	pub rule: ObjectiveRule,
	pub batch_size: u64,
}

impl SweepParameters {
	pub fn from_job_parameters(parameters: &JobParameters) -> Result<Self> {
		serde_json::from_value(parameters.to_value())
			.map_err(|e| JobError::invalid_parameter("parameters", e.to_string()))
	}

	pub fn variable_names(&self) -> Vec<String> {
		self.variables.iter().map(|v| v.name.clone()).collect()
	}

	/// Number of rows the sweep produces, or `None` on overflow.
	pub fn combinations(&self) -> Option<u64> {
		self.variables
			.iter()
			.try_fold(1u64, |acc, v| acc.checked_mul(v.length as u64))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRow {
	pub variables: Vec<f64>,
	pub payoff: f64,
	pub policy: Vec<PolicyDecision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
	pub variable_names: Vec<String>,
	pub rule: ObjectiveRule,
	pub rows: Vec<SweepRow>,
}

#[derive(Deserialize)]
struct RawVariable {
	name: Option<String>,
	min: Option<f64>,
	max: Option<f64>,
	length: Option<u64>,
	step: Option<f64>,
}

pub struct SensitivityAnalysisJob {
	name: String,
	default_batch_size: u64,
	max_combinations: u64,
}

impl SensitivityAnalysisJob {
	pub fn new(config: &SweepConfig) -> Self {
		Self {
			name: config.job_name.clone(),
			default_batch_size: config.default_batch_size as u64,
			max_combinations: config.max_combinations as u64,
		}
	}

	fn parse_variable(index: usize, value: &Value) -> Result<VariableRange> {
		let field = |name: &str| format!("variables[{index}].{name}");
		let raw: RawVariable = serde_json::from_value(value.clone())
			.map_err(|e| JobError::invalid_parameter(format!("variables[{index}]"), e.to_string()))?;

		let name = raw
			.name
			.ok_or_else(|| JobError::invalid_parameter(field("name"), "is required"))?;
		if !is_identifier(&name) {
			return Err(JobError::invalid_parameter(
				field("name"),
				format!("'{name}' is not a valid variable name"),
			));
		}
		let min = raw
			.min
			.ok_or_else(|| JobError::invalid_parameter(field("min"), "is required"))?;
		let max = raw
			.max
			.ok_or_else(|| JobError::invalid_parameter(field("max"), "is required"))?;
		if !min.is_finite() || !max.is_finite() || min > max {
			return Err(JobError::invalid_parameter(
				field("max"),
				format!("range [{min}, {max}] is empty or not finite"),
			));
		}

		let length = match (raw.length, raw.step) {
			(Some(_), Some(_)) => {
				return Err(JobError::invalid_parameter(
					field("step"),
					"give either length or step, not both",
				))
			}
			(Some(0), None) => {
				return Err(JobError::invalid_parameter(field("length"), "must be at least 1"))
			}
			(Some(length), None) => length,
			(None, Some(step)) if step.is_finite() && step > 0.0 => {
				(((max - min) / step).round() as u64).saturating_add(1)
			}
			(None, Some(_)) => {
				return Err(JobError::invalid_parameter(field("step"), "must be positive"))
			}
			(None, None) => {
				return Err(JobError::invalid_parameter(
					field("length"),
					"one of length or step is required",
				))
			}
		};
		let length = usize::try_from(length)
			.map_err(|_| JobError::invalid_parameter(field("length"), "is too large"))?;
		if min == max && length > 1 {
			return Err(JobError::invalid_parameter(
				field("length"),
				format!("a single-point range [{min}, {max}] cannot hold {length} points"),
			));
		}

		Ok(VariableRange {
			name,
			min,
			max,
			length,
		})
	}
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '_' => {
			chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
		}
		_ => false,
	}
}

/// Advance the mixed-radix cursor; the last variable varies fastest.
fn advance(cursor: &mut [usize], axes: &[Vec<f64>]) {
	for position in (0..cursor.len()).rev() {
		cursor[position] += 1;
		if cursor[position] < axes[position].len() {
			return;
		}
		cursor[position] = 0;
	}
}

#[async_trait]
impl Job for SensitivityAnalysisJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn description(&self) -> &str {
		"Evaluates a decision model over a grid of variable values"
	}

	fn create_job_parameters(&self, values: &Value) -> Result<JobParameters> {
		let object = values
			.as_object()
			.ok_or_else(|| JobError::invalid_parameter("parameters", "expected a JSON object"))?;

		let raw_variables = object
			.get("variables")
			.and_then(Value::as_array)
			.filter(|variables| !variables.is_empty())
			.ok_or_else(|| JobError::invalid_parameter("variables", "expected a non-empty array"))?;
		let variables = raw_variables
			.iter()
			.enumerate()
			.map(|(index, value)| Self::parse_variable(index, value))
			.collect::<Result<Vec<_>>>()?;

		let mut seen = HashSet::new();
		for variable in &variables {
			if !seen.insert(variable.name.as_str()) {
				return Err(JobError::invalid_parameter(
					"variables",
					format!("variable '{}' is swept twice", variable.name),
				));
			}
		}

		let rule = match object.get("rule") {
			None | Some(Value::Null) => ObjectiveRule::default(),
			Some(Value::String(rule)) => rule
				.parse()
				.map_err(|e: String| JobError::invalid_parameter("rule", e))?,
			Some(_) => return Err(JobError::invalid_parameter("rule", "expected a string")),
		};

		let batch_size = match object.get("batchSize") {
			None | Some(Value::Null) => self.default_batch_size,
			Some(value) => value.as_u64().filter(|n| *n >= 1).ok_or_else(|| {
				JobError::invalid_parameter("batchSize", "expected an integer of at least 1")
			})?,
		};

		let sweep = SweepParameters {
			variables,
			rule,
			batch_size,
		};
		match sweep.combinations() {
			Some(n) if n <= self.max_combinations => {}
			_ => {
				return Err(JobError::invalid_parameter(
					"variables",
					format!(
						"sweep exceeds the limit of {} combinations",
						self.max_combinations
					),
				))
			}
		}

		JobParameters::from_value(self.name.clone(), &serde_json::to_value(&sweep)?)
	}

	async fn execute(
		&self,
		ctx: &JobContext,
		parameters: &JobParameters,
		snapshot: &DecisionModel,
	) -> Result<JobOutcome> {
		let sweep = SweepParameters::from_job_parameters(parameters)?;
		snapshot.validate()?;

		let total = sweep
			.combinations()
			.ok_or_else(|| JobError::invalid_parameter("variables", "too many combinations"))?;
		let names = sweep.variable_names();
		let axes: Vec<Vec<f64>> = sweep.variables.iter().map(VariableRange::points).collect();
		let mut result = SweepResult {
			variable_names: names.clone(),
			rule: sweep.rule,
			rows: Vec::with_capacity(total.min(MAX_PREALLOCATED_ROWS) as usize),
		};

		debug!(execution_id = %ctx.execution_id, total, batch_size = sweep.batch_size, "starting sweep");
		ctx.report_progress(0, total).await?;

		let mut cursor = vec![0usize; axes.len()];
		let mut done = 0u64;
		while done < total {
			let batch_end = done.saturating_add(sweep.batch_size).min(total);
			while done < batch_end {
				let values: Vec<f64> = cursor
					.iter()
					.zip(&axes)
					.map(|(&index, axis)| axis[index])
					.collect();
				let scope: Scope = names.iter().cloned().zip(values.iter().copied()).collect();
				let evaluation = sweep.rule.evaluate(snapshot, &scope)?;
				result.rows.push(SweepRow {
					variables: values,
					payoff: evaluation.payoff,
					policy: evaluation.policy,
				});
				advance(&mut cursor, &axes);
				done += 1;
			}

			ctx.report_progress(done, total).await?;
			tokio::task::yield_now().await;
			if done < total && ctx.should_stop().await? {
				info!(execution_id = %ctx.execution_id, rows = done, total, "sweep stopped");
				return Ok(JobOutcome::Stopped(serde_json::to_value(&result)?));
			}
		}

		Ok(JobOutcome::Completed(serde_json::to_value(&result)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	fn job() -> SensitivityAnalysisJob {
		SensitivityAnalysisJob::new(&SweepConfig::default())
	}

	fn invalid_field(result: Result<JobParameters>) -> String {
		match result {
			Err(JobError::InvalidParameter { name, .. }) => name,
			other => panic!("expected invalid parameter, got {other:?}"),
		}
	}

	#[test]
	fn test_points_are_evenly_spaced() {
		let range = VariableRange {
			name: "x".to_string(),
			min: 0.0,
			max: 10.0,
			length: 11,
		};
		assert_eq!(
			range.points(),
			(0..=10).map(|i| i as f64).collect::<Vec<_>>()
		);

		let single = VariableRange {
			length: 1,
			..range
		};
		assert_eq!(single.points(), vec![0.0]);
	}

	#[test]
	fn test_step_converts_to_length() {
		let params = job()
			.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "step": 0.25}]
			}))
			.unwrap();
		let sweep = SweepParameters::from_job_parameters(&params).unwrap();
		assert_eq!(sweep.variables[0].length, 5);
		assert_eq!(sweep.batch_size, 100);
		assert_eq!(sweep.rule, ObjectiveRule::ExpectedValueMaximization);
	}

	#[test]
	fn test_rule_and_batch_size_are_normalized() {
		let params = job()
			.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "length": 2}],
				"rule": "min",
				"batchSize": 7
			}))
			.unwrap();
		assert_eq!(params.get("rule"), Some(&json!("expected-value-minimization")));
		assert_eq!(params.get("batchSize"), Some(&json!(7)));
	}

	#[test]
	fn test_invalid_parameters_name_the_field() {
		let job = job();
		assert_eq!(invalid_field(job.create_job_parameters(&json!([]))), "parameters");
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({"variables": []}))),
			"variables"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 2, "max": 1, "length": 3}]
			}))),
			"variables[0].max"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1}]
			}))),
			"variables[0].length"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "length": 0}]
			}))),
			"variables[0].length"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "step": -1}]
			}))),
			"variables[0].step"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "1x", "min": 0, "max": 1, "length": 2}]
			}))),
			"variables[0].name"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [
					{"name": "x", "min": 0, "max": 1, "length": 2},
					{"name": "x", "min": 0, "max": 1, "length": 2}
				]
			}))),
			"variables"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "length": 2}],
				"rule": "median"
			}))),
			"rule"
		);
		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 0, "max": 1, "length": 2}],
				"batchSize": 0
			}))),
			"batchSize"
		);
	}

	#[test]
	fn test_single_point_range() {
		let job = job();
		let params = job
			.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 4, "max": 4, "length": 1}]
			}))
			.unwrap();
		let sweep = SweepParameters::from_job_parameters(&params).unwrap();
		assert_eq!(sweep.variables[0].points(), vec![4.0]);

		let stepped = job
			.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 4, "max": 4, "step": 0.5}]
			}))
			.unwrap();
		let sweep = SweepParameters::from_job_parameters(&stepped).unwrap();
		assert_eq!(sweep.variables[0].length, 1);

		assert_eq!(
			invalid_field(job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": 4, "max": 4, "length": 3}]
			}))),
			"variables[0].length"
		);
	}

	#[test]
	fn test_combination_limit() {
		let job = SensitivityAnalysisJob::new(&SweepConfig {
			max_combinations: 100,
			..SweepConfig::default()
		});
		let ok = job.create_job_parameters(&json!({
			"variables": [
				{"name": "a", "min": 0, "max": 1, "length": 10},
				{"name": "b", "min": 0, "max": 1, "length": 10}
			]
		}));
		assert!(ok.is_ok());

		let too_many = job.create_job_parameters(&json!({
			"variables": [
				{"name": "a", "min": 0, "max": 1, "length": 10},
				{"name": "b", "min": 0, "max": 1, "length": 11}
			]
		}));
		assert_eq!(invalid_field(too_many), "variables");
	}

	#[test]
	fn test_cursor_enumerates_first_variable_slowest() {
		let axes = vec![vec![0.0, 1.0], vec![0.0, 1.0, 2.0]];
		let mut cursor = vec![0, 0];
		let mut seen = Vec::new();
		for _ in 0..6 {
			seen.push(cursor.clone());
			advance(&mut cursor, &axes);
		}
		assert_eq!(
			seen,
			vec![
				vec![0, 0],
				vec![0, 1],
				vec![0, 2],
				vec![1, 0],
				vec![1, 1],
				vec![1, 2]
			]
		);
		assert_eq!(cursor, vec![0, 0]);
	}

	proptest! {
		/// Normalized parameters normalize to themselves.
		#[test]
		fn normalization_is_idempotent(
			min in -1000.0f64..1000.0,
			span in 1.0f64..1000.0,
			length in 1u64..50,
			batch in 1u64..500,
		) {
			let job = job();
			let first = job.create_job_parameters(&json!({
				"variables": [{"name": "x", "min": min, "max": min + span, "length": length}],
				"batchSize": batch
			})).unwrap();
			let second = job.create_job_parameters(&first.to_value()).unwrap();
			prop_assert_eq!(first, second);
		}

		/// Every point lies inside the range and the endpoints are hit.
		#[test]
		fn points_stay_in_range(min in -1000.0f64..1000.0, span in 0.0f64..1000.0, length in 2usize..200) {
			let range = VariableRange { name: "x".to_string(), min, max: min + span, length };
			let points = range.points();
			prop_assert_eq!(points.len(), length);
			prop_assert_eq!(points[0], min);
			prop_assert!((points[length - 1] - (min + span)).abs() < 1e-9);
			for point in points {
				prop_assert!(point >= min - 1e-9 && point <= min + span + 1e-9);
			}
		}
	}
}
