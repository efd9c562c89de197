// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;

use serde_json::{json, Map, Value};

/// Sweep range given on the command line.
///
/// Accepted forms are `name=min:max:length` and `name=min:max/step`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableArg {
	pub name: String,
	pub min: f64,
	pub max: f64,
	pub points: Points,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Points {
	Length(u64),
	Step(f64),
}

impl FromStr for VariableArg {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (name, range) = s
			.split_once('=')
			.ok_or_else(|| format!("expected name=min:max:length, got '{s}'"))?;
		let name = name.trim();
		if name.is_empty() {
			return Err(format!("missing variable name in '{s}'"));
		}

		let (bounds, points) = match range.split_once('/') {
			Some((bounds, step)) => (bounds, Points::Step(parse_number(step, "step")?)),
			None => match range.rsplit_once(':') {
				Some((bounds, length)) if bounds.contains(':') => {
					let length = length
						.trim()
						.parse::<u64>()
						.map_err(|_| format!("invalid length '{length}'"))?;
					(bounds, Points::Length(length))
				}
				_ => return Err(format!("expected min:max:length or min:max/step, got '{range}'")),
			},
		};
		let (min, max) = bounds
			.split_once(':')
			.ok_or_else(|| format!("expected min:max, got '{bounds}'"))?;

		Ok(Self {
			name: name.to_string(),
			min: parse_number(min, "min")?,
			max: parse_number(max, "max")?,
			points,
		})
	}
}

fn parse_number(raw: &str, field: &str) -> Result<f64, String> {
	let value = raw
		.trim()
		.parse::<f64>()
		.map_err(|_| format!("invalid {field} '{raw}'"))?;
	if !value.is_finite() {
		return Err(format!("{field} must be a finite number, got '{raw}'"));
	}
	Ok(value)
}

impl VariableArg {
	pub fn to_value(&self) -> Value {
		let mut object = Map::new();
		object.insert("name".to_string(), json!(self.name));
		object.insert("min".to_string(), json!(self.min));
		object.insert("max".to_string(), json!(self.max));
		match self.points {
			Points::Length(length) => object.insert("length".to_string(), json!(length)),
			Points::Step(step) => object.insert("step".to_string(), json!(step)),
		};
		Value::Object(object)
	}
}

/// Raw sweep parameters; validation is left to the job.
pub fn sweep_values(variables: &[VariableArg], rule: Option<&str>, batch_size: Option<u64>) -> Value {
	let mut values = Map::new();
	values.insert(
		"variables".to_string(),
		Value::Array(variables.iter().map(VariableArg::to_value).collect()),
	);
	if let Some(rule) = rule {
		values.insert("rule".to_string(), json!(rule));
	}
	if let Some(batch_size) = batch_size {
		values.insert("batchSize".to_string(), json!(batch_size));
	}
	Value::Object(values)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_length_form() {
		let arg: VariableArg = "x=0:10:11".parse().unwrap();
		assert_eq!(arg.name, "x");
		assert_eq!(arg.min, 0.0);
		assert_eq!(arg.max, 10.0);
		assert_eq!(arg.points, Points::Length(11));
	}

	#[test]
	fn test_parse_step_form() {
		let arg: VariableArg = "rate=-1.5:1.5/0.5".parse().unwrap();
		assert_eq!(arg.min, -1.5);
		assert_eq!(arg.points, Points::Step(0.5));
		assert_eq!(arg.to_value()["step"], json!(0.5));
	}

	#[test]
	fn test_parse_errors() {
		assert!("x".parse::<VariableArg>().is_err());
		assert!("=0:1:2".parse::<VariableArg>().is_err());
		assert!("x=0:1".parse::<VariableArg>().is_err());
		assert!("x=a:1:2".parse::<VariableArg>().is_err());
		assert!("x=0:1:two".parse::<VariableArg>().is_err());
	}

	#[test]
	fn test_non_finite_bounds_rejected() {
		assert!("x=nan:1:2".parse::<VariableArg>().is_err());
		assert!("x=0:inf:2".parse::<VariableArg>().is_err());
		assert!("x=-infinity:0:2".parse::<VariableArg>().is_err());
		assert!("x=0:1/NaN".parse::<VariableArg>().is_err());
	}

	#[test]
	fn test_sweep_values() {
		let vars = vec!["x=0:1:2".parse().unwrap()];
		let values = sweep_values(&vars, Some("min"), Some(5));
		assert_eq!(values["variables"][0]["length"], json!(2));
		assert_eq!(values["rule"], "min");
		assert_eq!(values["batchSize"], json!(5));

		let values = sweep_values(&vars, None, None);
		assert!(values.get("rule").is_none());
	}
}
