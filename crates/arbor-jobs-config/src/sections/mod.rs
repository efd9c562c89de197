// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod launcher;
mod logging;
mod repository;
mod sweep;
mod worker;

pub use launcher::{DuplicateRunPolicy, LauncherConfig, LauncherConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use repository::{RepositoryBackend, RepositoryConfig, RepositoryConfigLayer, DEFAULT_DATABASE_URL};
pub use sweep::{SweepConfig, SweepConfigLayer};
pub use worker::{WorkerConfig, WorkerConfigLayer};
