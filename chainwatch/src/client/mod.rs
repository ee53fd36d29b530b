//! Clients for the node-local data sources.
//!
//! Each client implements [`Source`]: one call to [`Source::poll`] is one
//! collection cycle, returning a decoded [`Report`] or a [`SourceError`].
//! Clients never retry; the scheduler owns timing and backoff.
//!
//! - [`bitcoin::BitcoinNodeClient`]: bitcoind JSON-RPC (batched).
//! - [`ethereum::ExecutionClient`]: execution client JSON-RPC (batched).
//! - [`beacon::BeaconClient`]: beacon node REST API.

pub mod beacon;
pub mod bitcoin;
pub mod ethereum;
pub mod jsonrpc;

pub use beacon::BeaconClient;
pub use bitcoin::BitcoinNodeClient;
pub use ethereum::ExecutionClient;
pub use jsonrpc::JsonRpcClient;

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SourceError;
use crate::types::{CallError, Report, SourceId};

/// A pollable data source.
///
/// Implementations must be cheap to call repeatedly and must not keep
/// state between polls beyond their HTTP client.
pub trait Source: Send + Sync + 'static {
    fn id(&self) -> SourceId;

    fn poll(&self) -> impl Future<Output = Result<Report, SourceError>> + Send;
}

/// Builds the shared `reqwest` client with a per-request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("chainwatch/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Joins a base URL and a path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps a transport-level `reqwest` failure onto the error taxonomy.
pub(crate) fn transport_error(err: &reqwest::Error, timeout: Duration) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(timeout)
    } else if err.is_decode() {
        SourceError::malformed("response body", err)
    } else if let Some(status) = err.status() {
        status_error(status).unwrap_or_else(|| SourceError::Connection(err.to_string()))
    } else {
        SourceError::Connection(err.to_string())
    }
}

/// Classifies a non-success HTTP status. Returns `None` for 2xx.
pub(crate) fn status_error(status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    let msg = format!("HTTP status {status}");
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth(msg),
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(msg),
        StatusCode::SERVICE_UNAVAILABLE => SourceError::NodeBusy(msg),
        s if s.is_server_error() => SourceError::Connection(msg),
        _ => SourceError::MalformedResponse(msg),
    })
}

/// `GET url` and decode the body as JSON.
pub(crate) async fn get_json(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<Value, SourceError> {
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| transport_error(&e, timeout))?;

    if let Some(err) = status_error(resp.status()) {
        return Err(err);
    }

    resp.json::<Value>()
        .await
        .map_err(|e| transport_error(&e, timeout))
}

/// `GET url` and return the body as text.
pub(crate) async fn get_text(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<String, SourceError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(&e, timeout))?;

    if let Some(err) = status_error(resp.status()) {
        return Err(err);
    }

    resp.text().await.map_err(|e| transport_error(&e, timeout))
}

/// Decodes one call's raw result into `T`.
pub(crate) fn decode<T: DeserializeOwned>(call: &str, value: Value) -> Result<T, SourceError> {
    serde_json::from_value(value).map_err(|e| SourceError::malformed(call, e))
}

/// Settles one call inside a multi-call poll: successes are returned,
/// failures are recorded in `errors` and yield `None`.
pub(crate) fn settle<T>(
    call: &'static str,
    result: Result<T, SourceError>,
    errors: &mut Vec<CallError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::debug!(call, %error, "node call failed");
            errors.push(CallError { call, error });
            None
        }
    }
}

/// Settles the next raw result of a batch with `decode`.
pub(crate) fn take_next<T>(
    results: &mut impl Iterator<Item = Result<Value, SourceError>>,
    call: &'static str,
    errors: &mut Vec<CallError>,
    decode: impl FnOnce(Value) -> Result<T, SourceError>,
) -> Option<T> {
    let raw = results
        .next()
        .unwrap_or_else(|| Err(SourceError::MalformedResponse(format!("{call}: no result"))));
    settle(call, raw.and_then(decode), errors)
}

/// Turns a multi-call poll into its final outcome: if every call failed
/// the whole poll failed with the first error, otherwise the partial
/// report stands.
pub(crate) fn finish(report: Report, calls: usize) -> Result<Report, SourceError> {
    if calls > 0 && report.call_errors.len() >= calls {
        let first = report
            .call_errors
            .into_iter()
            .next()
            .map(|c| c.error)
            .unwrap_or_else(|| SourceError::MalformedResponse("no calls answered".into()));
        return Err(first);
    }
    Ok(report)
}
