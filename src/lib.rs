//! Sandboxed template expressions for workflow automation
//!
//! Templates mix literal text with `{{ expression }}` segments that read the
//! current item, other nodes' output and the environment. Evaluation is
//! total: every call returns an [`EvaluationResult`] carrying either a value
//! or a classified error, never a panic.
//!
//! ```rust
//! use flowexpr::{EngineConfig, ExpressionContext, ExpressionEngine};
//! use serde_json::json;
//!
//! let engine = ExpressionEngine::new(EngineConfig::default()).unwrap();
//! let ctx = ExpressionContext::new(json!({"items": [1, 2, 3]}));
//!
//! let result = engine.evaluate("{{ $json.items.length }} items", &ctx);
//! assert_eq!(result.value().and_then(|v| v.as_str()), Some("3 items"));
//! ```

pub mod ast;
pub mod cache;
pub mod completion;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod parser;
pub mod query;
pub mod registry;
pub mod security;
pub mod validation;

// Re-export main types
pub use cache::{CacheConfig, CacheStats, FingerprintMode};
pub use completion::{CompletionItem, CompletionKind};
pub use context::{EnvironmentVariables, ExpressionContext, PairedItemLineage};
pub use error::{ConfigError, ErrorLevel, ExpressionError, ParseError, PairedItemError, Result};
pub use evaluator::{
    CancellationToken, EngineConfig, ErrorPosition, EvaluationMetadata, EvaluationResult,
    ExpressionEngine, OutputFormat,
};
pub use model::Value;
pub use parser::{Template, parse_template};
pub use query::{JsonQuery, SimpleJsonPath};
pub use security::{SecurityConfig, SecurityPolicy};
pub use validation::{
    ValidationConfig, ValidationEngine, ValidationIssue, ValidationLayer, ValidationResult,
};
