//! Ethereum reference: height from public JSON-RPC endpoints, optional
//! participation rate from a beaconcha.in-style API.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

use crate::client::jsonrpc::{JsonRpcClient, RpcCall, quantity_u64};
use crate::client::{Source, decode, finish, get_json, http_client, settle};
use crate::error::SourceError;
use crate::reference::ExternalReference;
use crate::types::{Payload, Report, SourceId};

const HEIGHT: &str = "eth_blockNumber";
const PARTICIPATION: &str = "participation";

struct Participation {
    url: String,
    client: Client,
}

/// External Ethereum reference.
///
/// Public endpoints are tried in order; the first one that answers wins.
/// Each attempt gets an equal share of the poll budget, so an endpoint
/// that accepts the connection and then hangs cannot starve the ones after
/// it. The participation URL, when configured, is fetched concurrently and
/// is expected to answer with `{"data": {"globalparticipationrate": 0.99}}`.
pub struct EthereumReference {
    rpcs: Vec<JsonRpcClient>,
    participation: Option<Participation>,
    /// Time the whole endpoint walk may take.
    budget: Duration,
    /// Upper bound of one endpoint attempt.
    per_endpoint: Duration,
}

/// Share of the poll timeout the calls may use; the rest is left for the
/// scheduler's own timeout so it never fires first.
fn call_budget(timeout: Duration) -> Duration {
    timeout.saturating_sub(timeout / 10)
}

impl EthereumReference {
    /// `timeout` is the timeout of one whole poll.
    pub fn new(
        rpc_urls: &[String],
        participation_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let urls: Vec<&str> = rpc_urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect();

        let budget = call_budget(timeout);
        let shares = u32::try_from(urls.len()).unwrap_or(u32::MAX).max(1);
        let per_endpoint = budget / shares;

        let rpcs = urls
            .into_iter()
            .map(|u| JsonRpcClient::new(u, None, per_endpoint))
            .collect::<Result<Vec<_>, _>>()?;

        let participation = match participation_url {
            Some(url) => Some(Participation {
                url: url.to_string(),
                client: http_client(budget)?,
            }),
            None => None,
        };

        Ok(Self {
            rpcs,
            participation,
            budget,
            per_endpoint,
        })
    }

    /// Per-attempt timeout used for the public endpoints.
    pub fn per_endpoint_timeout(&self) -> Duration {
        self.per_endpoint
    }

    async fn height(&self) -> Result<u64, SourceError> {
        let call = RpcCall::new(HEIGHT);
        let deadline = Instant::now() + self.budget;
        let mut last_err = SourceError::Connection("no external endpoints configured".into());

        for rpc in &self.rpcs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(url = rpc.url(), "external budget spent; skipping endpoint");
                break;
            }
            let limit = self.per_endpoint.min(remaining);

            let result = match tokio::time::timeout(limit, rpc.call(&call)).await {
                Ok(outcome) => outcome.and_then(|v| quantity_u64(&v)),
                Err(_) => Err(SourceError::Timeout(limit)),
            };
            match result {
                Ok(height) => return Ok(height),
                Err(e) => {
                    tracing::debug!(url = rpc.url(), error = %e, "external endpoint failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn participation_rate(&self, p: &Participation) -> Result<f64, SourceError> {
        #[derive(Deserialize)]
        struct Epoch {
            #[serde(rename = "globalparticipationrate")]
            global_participation_rate: Option<f64>,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Epoch,
        }

        let body = get_json(&p.client, &p.url, self.budget).await?;
        let env: Envelope = decode(PARTICIPATION, body)?;
        env.data.global_participation_rate.ok_or_else(|| {
            SourceError::MalformedResponse("globalparticipationrate missing".into())
        })
    }
}

impl Source for EthereumReference {
    fn id(&self) -> SourceId {
        SourceId::EthereumExternal
    }

    async fn poll(&self) -> Result<Report, SourceError> {
        let participation = async {
            match &self.participation {
                Some(p) => Some(self.participation_rate(p).await),
                None => None,
            }
        };
        let (height, participation) = tokio::join!(self.height(), participation);

        let mut errors = Vec::new();
        let calls = if participation.is_some() { 2 } else { 1 };
        let height = settle(HEIGHT, height, &mut errors);
        let participation_rate =
            participation.and_then(|rate| settle(PARTICIPATION, rate, &mut errors));

        finish(
            Report::new(Payload::External(ExternalReference {
                height,
                participation_rate,
            }))
            .with_call_errors(errors),
            calls,
        )
    }
}
