//! Row gateway for the brigade back office.
//!
//! A thin, typed request builder over the backing store's REST interface.
//! Row-level policies live server-side; this client only forwards the
//! caller's bearer token and surfaces policy rejections as API errors.
//! The gateway is the single data path — there is no privileged fallback
//! query anywhere in the workspace.
//!
//! # Features
//!
//! - Query API (`execute`, `insert`, `update`, `delete`)
//! - Filtering (`eq`, `gt`, `lt`, ...)
//! - Ordering and pagination

use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Structured error details as the backing store reports them.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: ApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl GatewayError {
    /// Whether the backing store rejected the request for authorization
    /// reasons (missing or insufficient role under the row policy).
    pub fn is_policy_rejection(&self) -> bool {
        match self {
            GatewayError::ApiError { status, .. }
            | GatewayError::UnparsedApiError { status, .. } => {
                *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }

    /// Whether the failure is transient (network trouble or a 5xx) and a
    /// manual retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::NetworkError(_) => true,
            GatewayError::ApiError { status, .. }
            | GatewayError::UnparsedApiError { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Request builder scoped to one table.
pub struct TableClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: BTreeMap<String, String>,
    order_params: Vec<String>,
}

impl TableClient {
    /// Create a new gateway client for one table.
    pub fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        http_client: Client,
    ) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        let key_value = HeaderValue::from_str(api_key)
            .map_err(|_| GatewayError::InvalidParameters("Invalid API key".to_string()))?;
        headers.insert("apikey", key_value);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Ok(Self {
            base_url: base_url.to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: BTreeMap::new(),
            order_params: Vec::new(),
        })
    }

    /// Add a header.
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, GatewayError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| GatewayError::InvalidParameters(format!("Invalid header name: {}", key)))?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Attach the caller's bearer token. Without it the backing store
    /// evaluates row policies as the anonymous role.
    pub fn with_auth(self, token: &str) -> Result<Self, GatewayError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    /// Columns to return.
    pub fn select(mut self, columns: &str) -> Self {
        self.query_params
            .insert("select".to_string(), columns.to_string());
        self
    }

    /// Equality filter
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.query_params
            .insert(column.to_string(), format!("eq.{}", value));
        self
    }

    /// Append a sort key. Repeated calls build a compound order, e.g.
    /// category then name for the menu listing.
    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        let order_str = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        self.order_params.push(format!("{}.{}", column, order_str));
        self
    }

    /// Limit the number of rows returned.
    pub fn limit(mut self, count: i32) -> Self {
        self.query_params
            .insert("limit".to_string(), count.to_string());
        self
    }

    /// Fetch rows.
    pub async fn execute<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<T>, GatewayError> {
        let url = self.build_url()?;
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(GatewayError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_body(response).await);
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| GatewayError::DeserializationError(e.to_string()))
    }

    /// Insert rows.
    pub async fn insert<T: Serialize>(&self, values: T) -> Result<Value, GatewayError> {
        let url = self.build_url()?;
        debug!("POST {}", url);

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .json(&values)
            .send()
            .await
            .map_err(GatewayError::NetworkError)?;

        Self::representation_from(response).await
    }

    /// Update matching rows.
    pub async fn update<T: Serialize>(&self, values: T) -> Result<Value, GatewayError> {
        let url = self.build_url()?;
        debug!("PATCH {}", url);

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );

        let response = self
            .http_client
            .patch(&url)
            .headers(headers)
            .json(&values)
            .send()
            .await
            .map_err(GatewayError::NetworkError)?;

        Self::representation_from(response).await
    }

    /// Delete matching rows.
    pub async fn delete(&self) -> Result<Value, GatewayError> {
        let url = self.build_url()?;
        debug!("DELETE {}", url);

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );

        let response = self
            .http_client
            .delete(&url)
            .headers(headers)
            .send()
            .await
            .map_err(GatewayError::NetworkError)?;

        Self::representation_from(response).await
    }

    async fn representation_from(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();

        if status.is_success() {
            let body_text = response.text().await.map_err(|e| {
                GatewayError::DeserializationError(format!("Failed to read response body: {}", e))
            })?;

            // 204 No Content and friends come back with an empty body.
            if body_text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                serde_json::from_str::<Value>(&body_text)
                    .map_err(|e| GatewayError::DeserializationError(e.to_string()))
            }
        } else {
            Err(Self::error_from_body(response).await)
        }
    }

    async fn error_from_body(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        match serde_json::from_str::<ApiErrorDetails>(&error_text) {
            Ok(details) => GatewayError::ApiError { details, status },
            Err(_) => GatewayError::UnparsedApiError {
                message: error_text,
                status,
            },
        }
    }

    fn build_url(&self) -> Result<String, GatewayError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;

        for (key, value) in &self.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        if !self.order_params.is_empty() {
            url.query_pairs_mut()
                .append_pair("order", &self.order_params.join(","));
        }

        Ok(url.to_string())
    }
}
