//! Minimal JSON-RPC 2.0 transport over HTTP.
//!
//! Used for bitcoind, Ethereum execution clients and public Ethereum
//! endpoints. Supports single calls and batches; each batch entry is
//! settled independently so that one failing method does not hide the
//! others.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{http_client, status_error, transport_error};
use crate::config::Credentials;
use crate::error::SourceError;

/// bitcoind `RPC_IN_WARMUP`.
const RPC_IN_WARMUP: i64 = -28;

/// One method invocation.
#[derive(Clone, Debug)]
pub struct RpcCall {
    pub method: &'static str,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            params: json!([]),
        }
    }

    pub fn with_params(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

impl RpcErrorObject {
    fn into_source_error(self, method: &str) -> SourceError {
        if self.code == RPC_IN_WARMUP {
            SourceError::NodeBusy(format!("{method}: {}", self.message))
        } else {
            SourceError::MalformedResponse(format!(
                "{method}: rpc error {}: {}",
                self.code, self.message
            ))
        }
    }
}

impl RpcResponse {
    fn into_result(self, method: &str) -> Result<Value, SourceError> {
        match self.error {
            Some(err) => Err(err.into_source_error(method)),
            None => Ok(self.result),
        }
    }
}

/// HTTP JSON-RPC client bound to one endpoint.
#[derive(Clone)]
pub struct JsonRpcClient {
    url: String,
    credentials: Option<Credentials>,
    client: Client,
    timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(
        url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            credentials,
            client: http_client(timeout)?,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issues a single call and returns its `result`.
    pub async fn call(&self, call: &RpcCall) -> Result<Value, SourceError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 0,
            method: call.method,
            params: &call.params,
        };
        let body = self.post(&request).await?;
        let response: RpcResponse = serde_json::from_value(body)
            .map_err(|e| SourceError::malformed(call.method, e))?;
        response.into_result(call.method)
    }

    /// Issues all `calls` as one batch. The outer `Result` is the fate of
    /// the HTTP exchange; the inner ones are per call, in `calls` order.
    pub async fn batch(
        &self,
        calls: &[RpcCall],
    ) -> Result<Vec<Result<Value, SourceError>>, SourceError> {
        let requests: Vec<RpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(id, call)| RpcRequest {
                jsonrpc: "2.0",
                id: id as u64,
                method: call.method,
                params: &call.params,
            })
            .collect();

        let body = self.post(&requests).await?;

        let entries: Vec<RpcResponse> = match body {
            Value::Array(_) => serde_json::from_value(body)
                .map_err(|e| SourceError::malformed("batch response", e))?,
            // Some servers answer a rejected batch with a single error object.
            other => {
                let single: RpcResponse = serde_json::from_value(other)
                    .map_err(|e| SourceError::malformed("batch response", e))?;
                return Err(single
                    .error
                    .map(|e| e.into_source_error("batch"))
                    .unwrap_or_else(|| {
                        SourceError::MalformedResponse("batch answered with a single object".into())
                    }));
            }
        };

        let mut by_id: HashMap<u64, RpcResponse> = entries
            .into_iter()
            .filter_map(|entry| entry.id.as_u64().map(|id| (id, entry)))
            .collect();

        Ok(calls
            .iter()
            .enumerate()
            .map(|(id, call)| match by_id.remove(&(id as u64)) {
                Some(entry) => entry.into_result(call.method),
                None => Err(SourceError::MalformedResponse(format!(
                    "{}: missing from batch response",
                    call.method
                ))),
            })
            .collect())
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, SourceError> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return Err(status_error(status)
                .unwrap_or_else(|| SourceError::Connection(format!("HTTP status {status}"))));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        // bitcoind reports RPC errors with HTTP 500 and a JSON body, so the
        // body is decoded before the status is judged.
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(e) => Err(status_error(status)
                .unwrap_or_else(|| SourceError::malformed("response body", e))),
        }
    }
}

/// Decodes an Ethereum quantity (`"0x1b4"`); plain JSON numbers are
/// accepted too.
pub fn quantity(value: &Value) -> Result<u128, SourceError> {
    match value {
        Value::String(s) => {
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .ok_or_else(|| {
                    SourceError::MalformedResponse(format!("not a hex quantity: {s:?}"))
                })?;
            if digits.is_empty() {
                return Err(SourceError::MalformedResponse("empty hex quantity".into()));
            }
            u128::from_str_radix(digits, 16)
                .map_err(|e| SourceError::malformed("hex quantity", e))
        }
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| SourceError::MalformedResponse(format!("not a quantity: {n}"))),
        other => Err(SourceError::MalformedResponse(format!(
            "expected quantity, got {other}"
        ))),
    }
}

/// [`quantity`] narrowed to `u64`.
pub fn quantity_u64(value: &Value) -> Result<u64, SourceError> {
    let q = quantity(value)?;
    u64::try_from(q)
        .map_err(|_| SourceError::MalformedResponse(format!("quantity {q} overflows u64")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_decode_from_hex_and_numbers() {
        assert_eq!(quantity(&json!("0x1b4")).unwrap(), 436);
        assert_eq!(quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(quantity(&json!(42)).unwrap(), 42);
        assert_eq!(quantity_u64(&json!("0xc3500")).unwrap(), 800_000);
    }

    #[test]
    fn bad_quantities_are_malformed() {
        for bad in [json!("1b4"), json!("0x"), json!("0xzz"), json!(null), json!(-1)] {
            assert!(
                matches!(quantity(&bad), Err(SourceError::MalformedResponse(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn warmup_error_maps_to_node_busy() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "id": 0,
            "result": null,
            "error": { "code": -28, "message": "Loading block index..." }
        }))
        .unwrap();
        assert!(matches!(
            resp.into_result("getblockchaininfo"),
            Err(SourceError::NodeBusy(_))
        ));
    }

    #[test]
    fn other_rpc_errors_are_malformed() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "id": 0,
            "error": { "code": -32601, "message": "Method not found" }
        }))
        .unwrap();
        match resp.into_result("eth_foo") {
            Err(SourceError::MalformedResponse(msg)) => assert!(msg.contains("-32601")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn request_serializes_as_jsonrpc_2() {
        let params = json!(["latest", false]);
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 3,
            method: "eth_getBlockByNumber",
            params: &params,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 3);
        assert_eq!(v["params"][0], "latest");
    }
}
