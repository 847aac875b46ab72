//! Typed gateways for the back-office tables.
//!
//! Each table module wraps the generic [`TableClient`] with the columns,
//! ordering and payloads of one table, and attaches the current access
//! token so the backing store's row policies see the right caller.

mod menu;
mod orders;
mod profiles;

pub use menu::MenuTable;
pub use orders::OrdersTable;
pub use profiles::ProfilesTable;

use std::sync::Arc;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use brigade_gateway::{GatewayError, TableClient};
use brigade_identity::IdentityClient;

use crate::error::{Error, Result};

/// Build a table client carrying the session's bearer token when one is
/// present. Anonymous callers get only the API key, so the row policies
/// treat them as the public role.
pub(crate) fn table_client(
    base_url: &str,
    anon_key: &str,
    table: &str,
    http_client: Client,
    identity: &Arc<IdentityClient>,
) -> Result<TableClient> {
    let client = TableClient::new(base_url, anon_key, table, http_client)?;
    match identity.access_token() {
        Some(token) => Ok(client.with_auth(&token)?),
        None => Ok(client),
    }
}

/// Decode the single row a `Prefer: return=representation` write echoes
/// back.
pub(crate) fn single_row<T: DeserializeOwned>(value: Value) -> Result<T> {
    let mut rows: Vec<T> = serde_json::from_value(value)
        .map_err(|e| Error::Gateway(GatewayError::DeserializationError(e.to_string())))?;
    match rows.pop() {
        Some(row) => Ok(row),
        None => Err(Error::Gateway(GatewayError::DeserializationError(
            "write returned no representation".to_string(),
        ))),
    }
}
