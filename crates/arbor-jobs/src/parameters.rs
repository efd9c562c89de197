// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, Result};

/// Validated, normalized input of one execution.
///
/// Values are kept in a sorted map so that two equal parameter sets always
/// serialize to the same canonical JSON, which the repositories use as a lookup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
	job_name: String,
	values: BTreeMap<String, Value>,
}

impl JobParameters {
	pub fn new(job_name: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
		Self {
			job_name: job_name.into(),
			values,
		}
	}

	/// Build from a JSON object, rejecting any other JSON shape.
	pub fn from_value(job_name: impl Into<String>, value: &Value) -> Result<Self> {
		let object = value
			.as_object()
			.ok_or_else(|| JobError::invalid_parameter("parameters", "expected a JSON object"))?;
		Ok(Self::new(
			job_name,
			object
				.iter()
				.map(|(key, value)| (key.clone(), value.clone()))
				.collect(),
		))
	}

	pub fn job_name(&self) -> &str {
		&self.job_name
	}

	pub fn values(&self) -> &BTreeMap<String, Value> {
		&self.values
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.values.get(name)
	}

	pub fn to_value(&self) -> Value {
		Value::Object(
			self.values
				.iter()
				.map(|(key, value)| (key.clone(), value.clone()))
				.collect(),
		)
	}

	pub fn to_canonical_json(&self) -> Result<String> {
		Ok(serde_json::to_string(&self.values)?)
	}

	pub fn from_canonical_json(job_name: impl Into<String>, json: &str) -> Result<Self> {
		Ok(Self::new(job_name, serde_json::from_str(json)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_canonical_json_ignores_insertion_order() {
		let a = JobParameters::from_value("sweep", &json!({"b": 1, "a": {"y": 2, "x": 1}})).unwrap();
		let b = JobParameters::from_value("sweep", &json!({"a": {"x": 1, "y": 2}, "b": 1})).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.to_canonical_json().unwrap(), b.to_canonical_json().unwrap());
	}

	#[test]
	fn test_canonical_json_roundtrip_preserves_equality() {
		let params =
			JobParameters::from_value("sweep", &json!({"min": 0.0, "length": 11, "rule": "max"}))
				.unwrap();
		let json = params.to_canonical_json().unwrap();
		let back = JobParameters::from_canonical_json("sweep", &json).unwrap();
		assert_eq!(back, params);
	}

	#[test]
	fn test_non_object_rejected() {
		let result = JobParameters::from_value("sweep", &json!([1, 2]));
		assert!(matches!(result, Err(JobError::InvalidParameter { .. })));
	}
}
