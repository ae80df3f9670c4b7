// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Template evaluation
//!
//! [`ExpressionEngine`] ties the parser, security policy, cache, method
//! registry and interpreter together behind three total entry points:
//! `evaluate`, `validate` and `complete`.

mod config;
mod engine;
mod interpreter;
mod result;

pub use config::{
    DebugConfig, EngineConfig, LIBRARY_DATE_TIME, LIBRARY_JSON_QUERY, OutputConfig, OutputFormat,
};
pub use engine::{CancellationToken, ExpressionEngine};
pub use result::{ErrorPosition, EvaluationMetadata, EvaluationResult};
