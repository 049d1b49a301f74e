// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod backend;
mod evaluation;
mod sync;

pub use backend::{BackendConfig, BackendConfigLayer, BackendKind};
pub use evaluation::{EvaluationConfig, EvaluationConfigLayer};
pub use sync::{SyncConfig, SyncConfigLayer};
