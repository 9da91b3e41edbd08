//! Configuration loading and management
//!
//! ```yaml
//! bind: "127.0.0.1:3000"
//! endpoints:
//!   pages:
//!     uri: /api/pages
//!     query_params: [content, $in_tags, $gte_rank]
//!     soft_delete: true
//!     pagination:
//!       per_page: 20
//!       sort: ["-created"]
//! ```

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::core::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::core::pipeline::ListSettings;
use crate::core::query::{DEFAULT_PER_PAGE, MAX_PER_PAGE, SortField};

/// Default cap on request bodies (2 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint uri must start with '/': {0}")]
    InvalidUri(String),

    #[error("endpoint {0}: resource name is empty")]
    EmptyResource(String),

    #[error("endpoint {uri}: per_page {per_page} is outside 1..={max}")]
    InvalidPerPage { uri: String, per_page: usize, max: usize },
}

/// List defaults for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub per_page: usize,
    pub max_per_page: usize,

    /// Default sort, each entry `field`, `-field` or `field:desc`
    pub sort: Vec<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            max_per_page: MAX_PER_PAGE,
            sort: Vec::new(),
        }
    }
}

impl PaginationConfig {
    pub fn to_settings(&self) -> ListSettings {
        ListSettings {
            per_page: self.per_page,
            max_per_page: self.max_per_page,
            sort: self.sort.iter().filter_map(|s| SortField::parse(s)).collect(),
        }
    }
}

/// Post-write worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Static configuration for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Route prefix, e.g. `/api/pages`
    pub uri: String,

    /// Resource name; defaults to the last segment of `uri`
    #[serde(default)]
    pub resource: Option<String>,

    /// Collection name; defaults to the resource name
    #[serde(default)]
    pub collection: Option<String>,

    /// Allow-listed filter parameters
    #[serde(default)]
    pub query_params: Vec<String>,

    #[serde(default)]
    pub allow_full_query: bool,

    #[serde(default)]
    pub soft_delete: bool,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl EndpointConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            resource: None,
            collection: None,
            query_params: Vec::new(),
            allow_full_query: false,
            soft_delete: false,
            pagination: PaginationConfig::default(),
            dispatch: DispatchConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn resource_name(&self) -> String {
        self.resource.clone().unwrap_or_else(|| {
            self.uri
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        })
    }

    pub fn collection_name(&self) -> String {
        self.collection.clone().unwrap_or_else(|| self.resource_name())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.uri.starts_with('/') {
            return Err(ConfigError::InvalidUri(self.uri.clone()));
        }
        if self.resource_name().is_empty() {
            return Err(ConfigError::EmptyResource(self.uri.clone()));
        }
        let p = &self.pagination;
        if p.per_page == 0 || p.per_page > p.max_per_page {
            return Err(ConfigError::InvalidPerPage {
                uri: self.uri.clone(),
                per_page: p.per_page,
                max: p.max_per_page,
            });
        }
        Ok(())
    }
}

/// Configuration for a whole service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed to call the service; `"*"` allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Endpoints by name
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        for endpoint in config.endpoints.values() {
            endpoint.validate()?;
        }
        Ok(config)
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name)
    }

    /// CORS policy for the configured origins, if any
    ///
    /// Origins that are not valid header values are skipped with a warning.
    pub fn cors_layer(&self) -> Option<CorsLayer> {
        if self.cors_origins.is_empty() {
            return None;
        }

        let origin = if self.cors_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            let origins: Vec<HeaderValue> = self
                .cors_origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(origins)
        };

        Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
bind: "0.0.0.0:8080"
endpoints:
  pages:
    uri: /api/pages
    query_params: [content, $in_tags]
    soft_delete: true
    pagination:
      per_page: 20
      sort: ["-created", "title"]
  notes:
    uri: /api/notes
    collection: notes_v2
"#;

    #[test]
    fn test_from_yaml_str() {
        let config = ServiceConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");

        let pages = config.endpoint("pages").unwrap();
        assert_eq!(pages.resource_name(), "pages");
        assert_eq!(pages.collection_name(), "pages");
        assert_eq!(pages.query_params, vec!["content", "$in_tags"]);
        assert!(pages.soft_delete);
        assert!(!pages.allow_full_query);
        assert_eq!(pages.pagination.max_per_page, MAX_PER_PAGE);
        assert_eq!(
            pages.pagination.to_settings().sort,
            vec![SortField::desc("created"), SortField::asc("title")]
        );
        assert_eq!(pages.dispatch, DispatchConfig::default());
        assert_eq!(pages.max_body_bytes, DEFAULT_MAX_BODY_BYTES);

        let notes = config.endpoint("notes").unwrap();
        assert_eq!(notes.collection_name(), "notes_v2");
        assert_eq!(notes.pagination.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_yaml_str("endpoints: {}").unwrap();
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert!(config.endpoints.is_empty());
        assert!(config.cors_layer().is_none());
    }

    #[test]
    fn test_cors_origins() {
        let config = ServiceConfig::from_yaml_str(
            "cors_origins: [\"https://app.example.com\", \"not a header\\n\"]",
        )
        .unwrap();
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.cors_layer().is_some());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ServiceConfig::from_yaml_str("endpoints:\n  x:\n    uri: api/x\n").unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));

        let err = ServiceConfig::from_yaml_str(
            "endpoints:\n  x:\n    uri: /api/x\n    pagination:\n      per_page: 600\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("per_page 600"));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ServiceConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 2);

        assert!(ServiceConfig::from_yaml_file("/definitely/not/here.yaml").is_err());
    }
}
