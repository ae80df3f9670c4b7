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

//! Engine configuration
//!
//! Hosts usually load the configuration from JSON; every section has defaults,
//! so `{}` is a valid configuration.
//!
//! ```rust
//! use flowexpr::EngineConfig;
//!
//! let config = EngineConfig::default()
//!     .with_timeout_ms(1_000)
//!     .with_cache_size(500)
//!     .with_debug(true);
//! assert!(config.validate().is_ok());
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, FingerprintMode};
use crate::error::ConfigError;
use crate::security::{SecurityConfig, SecurityPolicy};

/// Library toggle gating `DateTime`, `$now` and `$today`
pub const LIBRARY_DATE_TIME: &str = "dateTime";
/// Library toggle gating JSON-path segments
pub const LIBRARY_JSON_QUERY: &str = "jsonQuery";

/// Logging switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugConfig {
    /// Log cache activity and security rejections at debug level
    pub enabled: bool,
    /// Log every evaluated segment at trace level
    pub trace_execution: bool,
    /// Log elapsed time per evaluation at info level
    pub log_performance: bool,
}

/// What `evaluate` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Evaluated value
    #[default]
    String,
    /// Parsed template structure, not evaluated
    Ast,
}

/// Output options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    /// Result shape
    pub format: OutputFormat,
    /// Attach evaluation metadata to results
    pub include_metadata: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sandbox settings
    pub security: SecurityConfig,
    /// Result cache settings
    pub cache: CacheConfig,
    /// Logging switches
    pub debug: DebugConfig,
    /// Optional libraries by name; missing names are enabled
    pub libraries: IndexMap<String, bool>,
    /// Output options
    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let libraries = [LIBRARY_DATE_TIME, LIBRARY_JSON_QUERY]
            .into_iter()
            .map(|name| (name.to_string(), true))
            .collect();
        Self {
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            debug: DebugConfig::default(),
            libraries,
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create new configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the evaluation deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.security.timeout_ms = timeout_ms;
        self
    }

    /// Set the memory ceiling
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.security.max_memory = bytes;
        self
    }

    /// Set the call-stack ceiling
    pub fn with_max_call_stack_size(mut self, depth: usize) -> Self {
        self.security.max_call_stack_size = depth;
        self
    }

    /// Replace the allowed globals
    pub fn with_allowed_globals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security.allowed_globals = names.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict callable methods; an empty list allows all
    pub fn with_allowed_methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security.allowed_methods = names.into_iter().map(Into::into).collect();
        self
    }

    /// Opt into rejecting computed member keys
    pub fn with_strict_grammar(mut self, strict: bool) -> Self {
        self.security.strict_grammar = strict;
        self
    }

    /// Enable or disable result caching
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    /// Set the cache capacity
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache.max_size = size;
        self
    }

    /// Set the cache entry lifetime
    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache.ttl_ms = ttl_ms;
        self
    }

    /// Choose how cache keys fingerprint the context
    pub fn with_fingerprint(mut self, mode: FingerprintMode) -> Self {
        self.cache.fingerprint = mode;
        self
    }

    /// Enable debug logging
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug.enabled = enabled;
        self
    }

    /// Enable or disable an optional library
    pub fn with_library(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.libraries.insert(name.into(), enabled);
        self
    }

    /// Choose the output shape
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output.format = format;
        self
    }

    /// Attach metadata to results
    pub fn with_metadata(mut self, include: bool) -> Self {
        self.output.include_metadata = include;
        self
    }

    /// Whether an optional library is enabled
    pub fn library_enabled(&self, name: &str) -> bool {
        self.libraries.get(name).copied().unwrap_or(true)
    }

    /// Check every section; also compiles the blocked patterns
    pub fn validate(&self) -> Result<(), ConfigError> {
        SecurityPolicy::new(self.security.clone())?;
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "cache.maxSize",
            });
        }
        if self.cache.enabled && self.cache.ttl_ms == 0 {
            return Err(ConfigError::ZeroLimit { field: "cache.ttl" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::BlockedPattern;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_json_is_the_default() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.security.timeout_ms, 5_000);
        assert_eq!(config.cache.max_size, 1_000);
    }

    #[test]
    fn camel_case_sections_load() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "security": {"timeout": 250, "maxCallStackSize": 10, "strictGrammar": true},
                "cache": {"enabled": false, "fingerprint": "dependencies"},
                "debug": {"traceExecution": true},
                "libraries": {"jsonQuery": false},
                "output": {"format": "ast", "includeMetadata": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.security.timeout_ms, 250);
        assert!(config.security.strict_grammar);
        assert_eq!(config.cache.fingerprint, FingerprintMode::Dependencies);
        assert!(config.debug.trace_execution);
        assert!(!config.library_enabled(LIBRARY_JSON_QUERY));
        assert!(config.library_enabled(LIBRARY_DATE_TIME));
        assert_eq!(config.output.format, OutputFormat::Ast);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert_eq!(
            EngineConfig::default().with_timeout_ms(0).validate(),
            Err(ConfigError::ZeroLimit {
                field: "security.timeout"
            })
        );
        assert_eq!(
            EngineConfig::default().with_cache_size(0).validate(),
            Err(ConfigError::ZeroLimit {
                field: "cache.maxSize"
            })
        );
        assert!(EngineConfig::default().with_cache(false).with_cache_size(0).validate().is_ok());

        let mut config = EngineConfig::default();
        config.security.allow_function_constructor = true;
        assert_eq!(config.validate(), Err(ConfigError::FunctionConstructorNotAllowed));

        let mut config = EngineConfig::default();
        config
            .security
            .blocked_patterns
            .push(BlockedPattern::new("broken", "("));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { name, .. }) if name == "broken"
        ));
    }
}
