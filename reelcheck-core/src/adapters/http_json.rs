//! Generic JSON-over-HTTP adapter
//!
//! Builds a request URL from a template, GETs it and reads typed signals out of
//! the JSON body through RFC 6901 pointers. No vendor request format is
//! encoded: everything source-specific lives in `[[sources.adapter]]` config.
//!
//! Template placeholders: `{primaryId}`, `{alternateId}`, `{title}`, `{year}`,
//! `{apiKey}` (read from the environment variable named by `api_key_env`).
//! They may appear in path segments or query values. The template is parsed
//! once; each request refills the segments and query pairs through `Url`, which
//! percent-encodes the substituted values. Static path text is taken literally.

use super::SourceAdapter;
use crate::types::{FetchError, MovieQuery, SignalMap};
use async_trait::async_trait;
use reelcheck_common::config::{AdapterSettings, FieldMapping, FieldSignal, SourceConfig};
use reelcheck_common::{Error, Result, Signal};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Adapter for one configured JSON endpoint
pub struct HttpJsonAdapter {
    config: SourceConfig,
    client: Client,
    base_url: Url,
    /// Path segments with placeholders, braces decoded
    path_template: Vec<String>,
    query_template: Vec<(String, String)>,
    needs_api_key: bool,
    api_key_env: Option<String>,
    requires_primary_id: bool,
    fields: Vec<FieldMapping>,
}

impl HttpJsonAdapter {
    /// Build from a source whose adapter settings are `http_json`
    pub fn new(config: SourceConfig) -> Result<Self> {
        let Some(AdapterSettings::HttpJson {
            url_template,
            api_key_env,
            timeout_secs,
            requires_primary_id,
            fields,
        }) = config.adapter.clone()
        else {
            return Err(Error::Config(format!(
                "Source {} is not configured as an http_json adapter",
                config.id
            )));
        };

        if fields.is_empty() {
            return Err(Error::Config(format!(
                "Source {} declares no field mappings",
                config.id
            )));
        }

        let base_url = Url::parse(&url_template).map_err(|e| {
            Error::Config(format!("Source {} has an invalid url_template: {}", config.id, e))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Source {} url_template must be http or https",
                config.id
            )));
        }
        // The parser escapes `{` and `}` in paths
        let path_template = base_url
            .path_segments()
            .ok_or_else(|| Error::Config(format!("Source {} url_template has no path", config.id)))?
            .map(|segment| segment.replace("%7B", "{").replace("%7D", "}"))
            .collect();
        let query_template = base_url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("reelcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            config,
            client,
            base_url,
            path_template,
            query_template,
            needs_api_key: url_template.contains("{apiKey}"),
            api_key_env,
            requires_primary_id,
            fields,
        })
    }

    /// Placeholder values this template needs for `query`
    fn placeholder_values(
        &self,
        query: &MovieQuery,
    ) -> std::result::Result<Vec<(&'static str, String)>, FetchError> {
        let uses = |placeholder: &str| {
            self.path_template.iter().any(|s| s.contains(placeholder))
                || self.query_template.iter().any(|(_, v)| v.contains(placeholder))
        };
        let mut values = vec![
            ("{title}", query.title.clone()),
            ("{year}", query.year.to_string()),
        ];

        if self.needs_api_key {
            let key = self
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    FetchError::MissingCredentials(format!(
                        "{} requires {}",
                        self.config.id,
                        self.api_key_env.as_deref().unwrap_or("an API key")
                    ))
                })?;
            values.push(("{apiKey}", key));
        }
        if uses("{primaryId}") {
            let id = query
                .primary_id
                .clone()
                .ok_or_else(|| FetchError::NotAvailable("query has no primary id".into()))?;
            values.push(("{primaryId}", id));
        }
        if uses("{alternateId}") {
            let id = query
                .alternate_id
                .clone()
                .ok_or_else(|| FetchError::NotAvailable("query has no alternate id".into()))?;
            values.push(("{alternateId}", id));
        }
        Ok(values)
    }

    /// Fill the template for `query`
    fn build_url(&self, query: &MovieQuery) -> std::result::Result<Url, FetchError> {
        let values = self.placeholder_values(query)?;
        let fill = |template: &str| {
            values
                .iter()
                .fold(template.to_string(), |acc, (placeholder, value)| {
                    acc.replace(placeholder, value)
                })
        };

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().extend(self.path_template.iter().map(|s| fill(s)));
        }
        url.set_query(None);
        if !self.query_template.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query_template.iter().map(|(key, value)| (key.as_str(), fill(value))));
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for HttpJsonAdapter {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn expected_fields(&self) -> usize {
        self.fields.len()
    }

    fn can_handle(&self, query: &MovieQuery) -> bool {
        if self.requires_primary_id && query.primary_id.is_none() {
            return false;
        }
        !query.title.trim().is_empty() || query.primary_id.is_some()
    }

    async fn fetch_signals(&self, query: &MovieQuery) -> std::result::Result<SignalMap, FetchError> {
        let url = self.build_url(query)?;
        debug!(source = %self.config.id, "Querying comparison source");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(e.to_string())
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotAvailable(format!(
                "{} has no entry for {}",
                self.config.id,
                query.entity_key()
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let signals = signals_from_body(&body, &self.fields);
        if signals.is_empty() {
            return Err(FetchError::NotAvailable(format!(
                "{} response carried none of the mapped fields",
                self.config.id
            )));
        }
        Ok(signals)
    }
}

/// Read every mapped field present in `body`
///
/// Absent, null or ill-typed values are skipped (they lower signal strength).
pub fn signals_from_body(body: &Value, fields: &[FieldMapping]) -> SignalMap {
    let mut signals = SignalMap::new();
    for mapping in fields {
        let Some(value) = body.pointer(&mapping.pointer).filter(|v| !v.is_null()) else {
            continue;
        };
        match to_signal(value, &mapping.signal) {
            Some(signal) => {
                signals.insert(mapping.field.clone(), signal);
            }
            None => debug!(field = %mapping.field, value = %value, "Unusable field value"),
        }
    }
    signals
}

fn to_signal(value: &Value, rule: &FieldSignal) -> Option<Signal> {
    match rule {
        FieldSignal::Numeric { scale } => {
            let raw = match value {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
                _ => return None,
            };
            Signal::numeric(raw, *scale).ok()
        }
        FieldSignal::Boolean => match value {
            Value::Bool(b) => Some(Signal::boolean(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Signal::boolean(true)),
                "false" | "no" | "0" => Some(Signal::boolean(false)),
                _ => None,
            },
            _ => None,
        },
        FieldSignal::Categorical { allowed } => {
            let label = value.as_str()?.trim();
            Signal::categorical(label, allowed.clone()).ok()
        }
        FieldSignal::Bucket { levels } => {
            let label = value.as_str()?.trim();
            let equivalent = levels.get(label)?;
            Some(Signal::bucket(label, *equivalent))
        }
    }
}
