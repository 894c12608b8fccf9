#![forbid(unsafe_code)]

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {detail}")]
    Transport { url: String, detail: String },
    #[error("response body is not valid JSON: {0}")]
    Body(#[from] std::io::Error),
    #[error("response has no {field} field")]
    MissingField { field: String },
    #[error("response field {field} is not an array of records")]
    NotAnArray { field: String },
}

/// Client for a JSON-over-HTTP transit API that authenticates with an
/// `api_key` header and wraps each resource in a named top-level field.
#[derive(Debug, Clone)]
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url,
            api_key: api_key.into(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base_url}/{endpoint}`, unwrapping the record array under
    /// `data_field`. Non-2xx responses, transport failures, and
    /// unexpected body shapes are all fetch errors.
    pub fn fetch_records(
        &self,
        endpoint: &str,
        data_field: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, FetchError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url).set("api_key", &self.api_key);
        for (name, value) in params {
            request = request.query(name, value);
        }

        let response = request.call().map_err(|err| match err {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.clone(),
                status,
            },
            ureq::Error::Transport(transport) => FetchError::Transport {
                url: url.clone(),
                detail: transport.to_string(),
            },
        })?;

        let body: Value = response.into_json()?;
        extract_records(body, data_field)
    }

    /// Pipeline-facing form: a failed fetch is logged and yields `None`
    /// so the caller can skip the feed instead of aborting the run.
    #[must_use]
    pub fn fetch_records_logged(
        &self,
        endpoint: &str,
        data_field: &str,
        params: &[(&str, &str)],
    ) -> Option<Vec<Value>> {
        match self.fetch_records(endpoint, data_field, params) {
            Ok(records) => Some(records),
            Err(err) => {
                warn!(endpoint, error = %err, "fetch failed, feed yields no data");
                None
            }
        }
    }
}

/// Pull the record array out of a response body.
pub fn extract_records(body: Value, data_field: &str) -> Result<Vec<Value>, FetchError> {
    let Value::Object(mut fields) = body else {
        return Err(FetchError::MissingField {
            field: data_field.to_owned(),
        });
    };
    match fields.remove(data_field) {
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(FetchError::NotAnArray {
            field: data_field.to_owned(),
        }),
        None => Err(FetchError::MissingField {
            field: data_field.to_owned(),
        }),
    }
}
