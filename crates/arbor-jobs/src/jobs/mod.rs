// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Built-in jobs.

pub mod sensitivity_analysis;

pub use sensitivity_analysis::{
	SensitivityAnalysisJob, SweepParameters, SweepResult, SweepRow, VariableRange,
};
