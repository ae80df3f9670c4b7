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

//! Expression engine entry points
//!
//! [`ExpressionEngine`] is cheap to clone and safe to share between threads.
//! The result cache is the only state shared between calls; every evaluation
//! gets its own interpreter and budget.
//!
//! ```rust
//! use flowexpr::{EngineConfig, ExpressionContext, ExpressionEngine};
//! use serde_json::json;
//!
//! let engine = ExpressionEngine::new(EngineConfig::default()).unwrap();
//! let ctx = ExpressionContext::new(json!({"name": "Ada"}));
//! let result = engine.evaluate("Hello {{ $json.name }}!", &ctx);
//! assert_eq!(result.value().unwrap().to_json(), json!("Hello Ada!"));
//! ```

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::config::{EngineConfig, LIBRARY_DATE_TIME, LIBRARY_JSON_QUERY, OutputFormat};
use super::interpreter::{Budget, Interpreter, Libraries};
use super::result::{ErrorPosition, EvaluationMetadata, EvaluationResult};
use crate::cache::{CacheKey, CacheStats, EvaluationCache, FingerprintMode};
use crate::completion::{CompletionItem, CompletionProvider};
use crate::context::ExpressionContext;
use crate::error::{ConfigError, ExpressionError};
use crate::model::Value;
use crate::parser::{ExpressionRoute, Segment, Template, compile_expression, parse_template};
use crate::query::{JsonQuery, SimpleJsonPath};
use crate::registry::{CallSite, ExtensionRegistry};
use crate::security::SecurityPolicy;
use crate::validation::{ValidationConfig, ValidationContext, ValidationEngine, ValidationResult};

/// Host-side switch observed by in-flight evaluations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; evaluations sharing this token stop at their next check
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct EngineInner {
    config: EngineConfig,
    policy: SecurityPolicy,
    registry: Arc<ExtensionRegistry>,
    cache: Option<EvaluationCache>,
    query: Arc<dyn JsonQuery>,
    validator: ValidationEngine,
    completion: CompletionProvider,
}

/// Sandboxed template evaluator
#[derive(Clone)]
pub struct ExpressionEngine {
    inner: Arc<EngineInner>,
}

type SegmentFailure = (ExpressionError, ErrorPosition);

impl ExpressionEngine {
    /// Create an engine with the built-in JSON-path implementation
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_query(config, Arc::new(SimpleJsonPath))
    }

    /// Create an engine with a host-supplied JSON-path implementation
    pub fn with_query(config: EngineConfig, query: Arc<dyn JsonQuery>) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = SecurityPolicy::new(config.security.clone())?;
        let registry = ExtensionRegistry::shared();
        let cache = config
            .cache
            .enabled
            .then(|| EvaluationCache::new(&config.cache));
        let validator = ValidationEngine::new(
            SecurityPolicy::new(config.security.clone())?,
            Arc::clone(&registry),
        );
        let completion =
            CompletionProvider::new(Arc::clone(&registry), policy.allowed_globals().to_vec());

        log::debug!(
            "expression engine ready (cache: {}, timeout: {} ms)",
            cache.as_ref().map_or(0, EvaluationCache::capacity),
            config.security.timeout_ms
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                policy,
                registry,
                cache,
                query,
                validator,
                completion,
            }),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Method registry used for dispatch and completion
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.inner.registry
    }

    /// Cache counters; `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(EvaluationCache::stats)
    }

    /// Drop every cached value
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
    }

    /// Evaluate a template; failures are reported inside the result
    pub fn evaluate(&self, template: &str, ctx: &ExpressionContext) -> EvaluationResult {
        self.run(template, ctx, None)
    }

    /// Evaluate, stopping with [`ExpressionError::Cancelled`] once `token` fires
    pub fn evaluate_with_cancellation(
        &self,
        template: &str,
        ctx: &ExpressionContext,
        token: &CancellationToken,
    ) -> EvaluationResult {
        self.run(template, ctx, Some(token))
    }

    /// Evaluate on the blocking pool so async hosts are never stalled
    pub async fn evaluate_async(
        &self,
        template: impl Into<String>,
        ctx: ExpressionContext,
        token: CancellationToken,
    ) -> EvaluationResult {
        if token.is_cancelled() {
            return EvaluationResult::failure(ExpressionError::Cancelled, None, 0.0);
        }
        let engine = self.clone();
        let template = template.into();
        let task = tokio::task::spawn_blocking(move || {
            engine.evaluate_with_cancellation(&template, &ctx, &token)
        });
        match task.await {
            Ok(result) => result,
            Err(err) => EvaluationResult::failure(
                ExpressionError::Internal {
                    message: format!("evaluation task failed: {err}"),
                },
                None,
                0.0,
            ),
        }
    }

    /// Statically check a template with the default validation limits
    pub fn validate(&self, template: &str, ctx: Option<&ExpressionContext>) -> ValidationResult {
        self.validate_with(template, ctx, ValidationConfig::default())
    }

    /// Statically check a template with explicit validation limits
    pub fn validate_with(
        &self,
        template: &str,
        ctx: Option<&ExpressionContext>,
        config: ValidationConfig,
    ) -> ValidationResult {
        let mut validation = ValidationContext::new(template).with_config(config);
        if let Some(ctx) = ctx {
            validation = validation.with_context(ctx);
        }
        self.inner.validator.validate(&validation)
    }

    /// Completion candidates at byte offset `cursor`
    pub fn complete(&self, template: &str, cursor: usize) -> Vec<CompletionItem> {
        self.inner.completion.complete(template, cursor)
    }

    /// Completion candidates that also offer keys of the current item and environment
    pub fn complete_in_context(
        &self,
        template: &str,
        cursor: usize,
        ctx: &ExpressionContext,
    ) -> Vec<CompletionItem> {
        self.inner.completion.complete_in_context(template, cursor, ctx)
    }

    fn run(
        &self,
        template: &str,
        ctx: &ExpressionContext,
        cancel: Option<&CancellationToken>,
    ) -> EvaluationResult {
        let start = Instant::now();
        let result = match parse_template(template) {
            Err(err) => {
                let end = (err.offset + 2).min(template.len()).max(err.offset);
                let position = ErrorPosition::new(err.offset, end);
                EvaluationResult::failure(err.into(), Some(position), elapsed_ms(start))
            }
            Ok(parsed) if self.inner.config.output.format == OutputFormat::Ast => {
                self.render_ast(&parsed, start)
            }
            Ok(parsed) => self.evaluate_template(&parsed, ctx, cancel, start),
        };

        if self.inner.config.debug.log_performance {
            log::info!(
                "evaluated template ({} bytes) in {:.3} ms, success: {}, cached: {}",
                template.len(),
                result.execution_time_ms,
                result.is_success(),
                result.cached
            );
        }
        result
    }

    fn render_ast(&self, parsed: &Template, start: Instant) -> EvaluationResult {
        let mut expressions = Vec::new();
        for segment in &parsed.segments {
            if let Segment::Resolvable {
                expression,
                expression_offset,
                ..
            } = segment
            {
                match compile_expression(expression, *expression_offset) {
                    Ok(compiled) => expressions.push(compiled),
                    Err(err) => {
                        let position = ErrorPosition::new(err.offset, err.offset + 1);
                        return EvaluationResult::failure(err.into(), Some(position), elapsed_ms(start));
                    }
                }
            }
        }

        match serde_json::to_value(&expressions) {
            Ok(expressions) => {
                let body = json!({
                    "segments": parsed.segments,
                    "expressions": expressions,
                });
                EvaluationResult::success(Value::from(body), elapsed_ms(start))
            }
            Err(err) => EvaluationResult::failure(
                ExpressionError::Internal {
                    message: err.to_string(),
                },
                None,
                elapsed_ms(start),
            ),
        }
    }

    fn evaluate_template(
        &self,
        parsed: &Template,
        ctx: &ExpressionContext,
        cancel: Option<&CancellationToken>,
        start: Instant,
    ) -> EvaluationResult {
        let inner = &*self.inner;
        let libraries = Libraries {
            date_time: inner.config.library_enabled(LIBRARY_DATE_TIME),
        };
        let budget = Budget::from_policy(&inner.policy, start);
        let mut interpreter = Interpreter::new(
            ctx,
            &inner.policy,
            &inner.registry,
            libraries,
            budget,
            cancel,
        );

        let mut metadata = EvaluationMetadata {
            segment_count: parsed.segments.len(),
            expression_count: parsed.expression_count(),
            ..Default::default()
        };
        let single = parsed.single_expression().is_some();
        let mut typed = None;
        let mut output = String::new();

        for segment in &parsed.segments {
            match segment {
                Segment::Literal { text, .. } => {
                    if !single {
                        output.push_str(text);
                    }
                }
                Segment::Resolvable {
                    from,
                    to,
                    expression,
                    expression_offset,
                } => {
                    let resolved = self.resolve(
                        expression,
                        *expression_offset,
                        ErrorPosition::new(*from, *to),
                        ctx,
                        &mut interpreter,
                        &mut metadata,
                    );
                    let value = match resolved {
                        Ok(value) => value,
                        Err((error, position)) => {
                            if inner.config.debug.enabled {
                                log::debug!(
                                    "segment [{from}, {to}) failed with {}: {error}",
                                    error.kind()
                                );
                            }
                            metadata.steps = interpreter.steps();
                            return EvaluationResult::failure(error, Some(position), elapsed_ms(start))
                                .with_metadata(self.metadata(metadata));
                        }
                    };
                    if inner.config.debug.trace_execution {
                        log::trace!("segment [{from}, {to}) -> {}", value.type_tag());
                    }
                    if single {
                        typed = Some(value);
                    } else {
                        let text = value.to_template_string();
                        if let Err(error) = interpreter.reserve(text.len()) {
                            return EvaluationResult::failure(
                                error,
                                Some(ErrorPosition::new(*from, *to)),
                                elapsed_ms(start),
                            );
                        }
                        output.push_str(&text);
                    }
                }
            }
        }

        metadata.steps = interpreter.steps();
        let value = typed.unwrap_or(Value::String(output));
        let cached = metadata.expression_count > 0 && metadata.cache_hits == metadata.expression_count;
        EvaluationResult::success(value, elapsed_ms(start))
            .with_cached(cached)
            .with_metadata(self.metadata(metadata))
    }

    fn metadata(&self, metadata: EvaluationMetadata) -> Option<EvaluationMetadata> {
        self.inner.config.output.include_metadata.then_some(metadata)
    }

    /// Security check, cache lookup, then evaluation of one resolvable segment
    fn resolve(
        &self,
        expression: &str,
        offset: usize,
        segment: ErrorPosition,
        ctx: &ExpressionContext,
        interpreter: &mut Interpreter<'_>,
        metadata: &mut EvaluationMetadata,
    ) -> Result<Value, SegmentFailure> {
        let inner = &*self.inner;
        if let Some(found) = inner.policy.find_blocked_pattern(expression) {
            if inner.config.debug.enabled {
                log::debug!("blocked pattern '{}' matched at {}", found.rule, offset + found.start);
            }
            return Err((
                ExpressionError::SecurityViolation {
                    rule: found.rule.to_string(),
                },
                ErrorPosition::new(offset + found.start, offset + found.end),
            ));
        }

        interpreter
            .check_interrupts()
            .map_err(|error| (error, segment))?;

        let compiled = compile_expression(expression, offset).map_err(|err| {
            let position = ErrorPosition::new(err.offset, err.offset + 1);
            (ExpressionError::from(err), position)
        })?;

        let key = match &inner.cache {
            Some(_) if !compiled.analysis.volatile => {
                let fingerprint = match inner.config.cache.fingerprint {
                    FingerprintMode::Full => ctx.full_fingerprint(),
                    FingerprintMode::Dependencies => ctx.dependency_fingerprint(&compiled.analysis),
                };
                Some(CacheKey::new(expression, fingerprint))
            }
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&inner.cache, &key) {
            if let Some(value) = cache.get(key) {
                if inner.config.debug.enabled {
                    log::debug!("cache hit for '{}'", compiled.source.trim());
                }
                metadata.cache_hits += 1;
                return Ok(value);
            }
            if inner.config.debug.enabled {
                log::debug!("cache miss for '{}'", compiled.source.trim());
            }
        }

        let value = match compiled.route {
            ExpressionRoute::JsonQuery => {
                if !inner.config.library_enabled(LIBRARY_JSON_QUERY) {
                    return Err((
                        ExpressionError::Unsupported {
                            message: "JSON-path queries are disabled".to_string(),
                        },
                        segment,
                    ));
                }
                inner
                    .query
                    .query(ctx.json(), expression.trim())
                    .map_err(|error| (error, segment))?
            }
            ExpressionRoute::Evaluator => {
                let ast = compiled.ast.as_deref().ok_or_else(|| {
                    (
                        ExpressionError::Internal {
                            message: "expression compiled without a tree".to_string(),
                        },
                        segment,
                    )
                })?;
                interpreter.eval(ast).map_err(|error| {
                    let position = interpreter
                        .take_error_span()
                        .map_or(segment, |(start, end)| {
                            ErrorPosition::new(offset + start, offset + end)
                        });
                    (error, position)
                })?
            }
        };

        if let (Some(cache), Some(key)) = (&inner.cache, key) {
            cache.insert(key, value.clone());
        }
        Ok(value)
    }
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine")
            .field("config", &self.inner.config)
            .field("cache", &self.cache_stats())
            .finish()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> ExpressionEngine {
        ExpressionEngine::new(EngineConfig::default()).unwrap()
    }

    fn ctx() -> ExpressionContext {
        ExpressionContext::new(json!({"name": "Ada", "count": 3, "tags": ["a", "b"]}))
    }

    #[test]
    fn single_expression_keeps_its_type() {
        let result = engine().evaluate("  {{ $json.count * 2 }} ", &ctx());
        assert_eq!(result.value(), Some(&Value::from(6.0)));
        assert_eq!(result.type_tag(), "number");
    }

    #[test]
    fn mixed_templates_concatenate() {
        let result = engine().evaluate("{{ $json.name }} has {{ $json.tags.length }} tags", &ctx());
        assert_eq!(result.value(), Some(&Value::from("Ada has 2 tags")));
    }

    #[test]
    fn plain_text_is_returned_verbatim() {
        let result = engine().evaluate("no expressions here", &ctx());
        assert_eq!(result.value(), Some(&Value::from("no expressions here")));
        assert!(!result.cached);
    }

    #[test]
    fn parse_errors_point_at_the_delimiter() {
        let result = engine().evaluate("abc {{ 1 + ", &ctx());
        assert_eq!(result.type_tag(), "parse_error");
        assert_eq!(result.error_position(), Some(ErrorPosition::new(4, 6)));
    }

    #[test]
    fn blocked_patterns_fail_before_evaluation() {
        let result = engine().evaluate("{{ eval('1') }}", &ctx());
        let error = result.error().unwrap();
        assert_eq!(error.kind(), "security_error");
        assert_eq!(result.error_position().map(|p| p.start), Some(3));
    }

    #[test]
    fn runtime_errors_carry_the_failing_node() {
        let result = engine().evaluate("x {{ $json.missing.trim() }}", &ctx());
        assert_eq!(result.type_tag(), "null_receiver_error");
        let position = result.error_position().unwrap();
        assert_eq!(position.start, 5);
    }

    #[test]
    fn cache_hits_are_flagged() {
        let engine = engine();
        let first = engine.evaluate("{{ $json.name.toUpperCase() }}", &ctx());
        assert!(!first.cached);
        let second = engine.evaluate("{{  $json.name.toUpperCase()  }}", &ctx());
        assert!(second.cached);
        assert_eq!(second.execution_time_ms, 0.0);
        assert_eq!(first.value(), second.value());
        assert_eq!(engine.cache_stats().unwrap().hits, 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let engine = engine();
        engine.evaluate("{{ nope }}", &ctx());
        engine.evaluate("{{ nope }}", &ctx());
        assert_eq!(engine.cache_stats().unwrap().size, 0);
    }

    #[test]
    fn volatile_expressions_bypass_the_cache() {
        let engine = engine();
        engine.evaluate("{{ $now.year }}", &ctx());
        let second = engine.evaluate("{{ $now.year }}", &ctx());
        assert!(!second.cached);
    }

    #[test]
    fn dependency_fingerprints_ignore_unrelated_fields() {
        let config = EngineConfig::default().with_fingerprint(FingerprintMode::Dependencies);
        let engine = ExpressionEngine::new(config).unwrap();
        engine.evaluate("{{ $json.name }}", &ExpressionContext::new(json!({"name": "a", "x": 1})));
        let second =
            engine.evaluate("{{ $json.name }}", &ExpressionContext::new(json!({"name": "a", "x": 2})));
        assert!(second.cached);
    }

    #[test]
    fn dependency_fingerprints_see_lengths_of_non_object_items() {
        let config = EngineConfig::default().with_fingerprint(FingerprintMode::Dependencies);
        let engine = ExpressionEngine::new(config).unwrap();

        let first = engine.evaluate("{{ $json.length }}", &ExpressionContext::new(json!([1, 2])));
        assert_eq!(first.value(), Some(&Value::Number(2.0)));
        let second = engine.evaluate("{{ $json.length }}", &ExpressionContext::new(json!([1, 2, 3])));
        assert!(!second.cached);
        assert_eq!(second.value(), Some(&Value::Number(3.0)));

        let third = engine.evaluate("{{ $json.length }}", &ExpressionContext::new(json!("abcd")));
        assert!(!third.cached);
        assert_eq!(third.value(), Some(&Value::Number(4.0)));
    }

    #[test]
    fn json_path_segments_use_the_query_seam() {
        let result = engine().evaluate("{{ $.tags[1] }}", &ctx());
        assert_eq!(result.value(), Some(&Value::from("b")));

        let config = EngineConfig::default().with_library(LIBRARY_JSON_QUERY, false);
        let result = ExpressionEngine::new(config).unwrap().evaluate("{{ $.tags[1] }}", &ctx());
        assert_eq!(result.type_tag(), "unsupported_error");
    }

    #[test]
    fn date_library_can_be_disabled() {
        let config = EngineConfig::default().with_library(LIBRARY_DATE_TIME, false);
        let result = ExpressionEngine::new(config).unwrap().evaluate("{{ $now }}", &ctx());
        assert_eq!(result.type_tag(), "not_defined_error");
    }

    #[test]
    fn ast_output_skips_evaluation() {
        let config = EngineConfig::default().with_output_format(OutputFormat::Ast);
        let result = ExpressionEngine::new(config).unwrap().evaluate("a {{ nope }}", &ctx());
        let body = result.value().unwrap().to_json();
        assert_eq!(body["segments"].as_array().unwrap().len(), 2);
        assert_eq!(body["expressions"][0]["source"], " nope ");
    }

    #[test]
    fn metadata_is_opt_in() {
        let result = engine().evaluate("{{ 1 }}", &ctx());
        assert!(result.metadata.is_none());

        let config = EngineConfig::default().with_metadata(true);
        let result = ExpressionEngine::new(config).unwrap().evaluate("a {{ 1 }} {{ 2 }}", &ctx());
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata.segment_count, 4);
        assert_eq!(metadata.expression_count, 2);
        assert!(metadata.steps >= 2);
    }

    #[test]
    fn cancelled_tokens_stop_evaluation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = engine().evaluate_with_cancellation("{{ 1 }}", &ctx(), &token);
        assert_eq!(result.error(), Some(&ExpressionError::Cancelled));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let err = ExpressionEngine::new(EngineConfig::default().with_timeout_ms(0)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroLimit {
                field: "security.timeout"
            }
        );
    }

    #[tokio::test]
    async fn async_evaluation_runs_on_the_blocking_pool() {
        let result = engine()
            .evaluate_async("{{ 2 + 3 }}", ctx(), CancellationToken::new())
            .await;
        assert_eq!(result.value(), Some(&Value::from(5.0)));
    }
}
