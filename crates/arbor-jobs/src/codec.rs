// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{JobError, Result};

/// Converts values to and from the string form that crosses execution-context boundaries.
pub trait MessageCodec<T>: Send + Sync {
	fn encode(&self, value: &T) -> Result<String>;
	fn decode(&self, raw: &str) -> Result<T>;
}

/// JSON codec backed by the type's serde implementations.
///
/// Domain types that need special handling on the way in (expressions kept as
/// source strings, for instance) carry it in their own `Deserialize` impl.
pub struct JsonCodec<T> {
	_marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
	pub fn new() -> Self {
		Self {
			_marker: PhantomData,
		}
	}
}

impl<T> Default for JsonCodec<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for JsonCodec<T> {
	fn clone(&self) -> Self {
		Self::new()
	}
}

impl<T> std::fmt::Debug for JsonCodec<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("JsonCodec")
	}
}

impl<T> MessageCodec<T> for JsonCodec<T>
where
	T: Serialize + DeserializeOwned,
{
	fn encode(&self, value: &T) -> Result<String> {
		serde_json::to_string(value).map_err(|e| JobError::Codec(format!("encode failed: {e}")))
	}

	fn decode(&self, raw: &str) -> Result<T> {
		serde_json::from_str(raw).map_err(|e| JobError::Codec(format!("decode failed: {e}")))
	}
}
