//! Beacon node (consensus client) REST source.
//!
//! Uses the standard Beacon API, so it works against Nimbus, Lighthouse,
//! Teku, Prysm and Lodestar alike. The four endpoints are fetched
//! concurrently and settled independently.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{Source, decode, endpoint, finish, get_json, http_client, settle};
use crate::error::SourceError;
use crate::types::{Payload, Report, SourceId};

const SYNCING: &str = "/eth/v1/node/syncing";
const FINALITY: &str = "/eth/v1/beacon/states/head/finality_checkpoints";
const PEER_COUNT: &str = "/eth/v1/node/peer_count";
const VERSION: &str = "/eth/v1/node/version";

/// Beacon API numbers are decimal strings; some clients emit plain numbers.
fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

fn decode_envelope<T: DeserializeOwned>(path: &str, body: Value) -> Result<T, SourceError> {
    decode::<Envelope<T>>(path, body).map(|env| env.data)
}

/// `/eth/v1/node/syncing`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BeaconSyncing {
    #[serde(default, deserialize_with = "opt_u64")]
    pub head_slot: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub sync_distance: Option<u64>,
    pub is_syncing: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
struct Checkpoint {
    #[serde(default, deserialize_with = "opt_u64")]
    epoch: Option<u64>,
}

/// `/eth/v1/beacon/states/head/finality_checkpoints`, epochs only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalityCheckpoints {
    pub finalized_epoch: Option<u64>,
    pub current_justified_epoch: Option<u64>,
}

impl<'de> Deserialize<'de> for FinalityCheckpoints {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            finalized: Option<Checkpoint>,
            current_justified: Option<Checkpoint>,
        }

        let raw = Raw::deserialize(d)?;
        Ok(Self {
            finalized_epoch: raw.finalized.and_then(|c| c.epoch),
            current_justified_epoch: raw.current_justified.and_then(|c| c.epoch),
        })
    }
}

/// `/eth/v1/node/peer_count`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BeaconPeers {
    #[serde(default, deserialize_with = "opt_u64")]
    pub connected: Option<u64>,
}

/// `/eth/v1/node/version`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BeaconVersion {
    pub version: Option<String>,
}

/// Everything one beacon poll produced. `None` means the call failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeaconRecord {
    pub syncing: Option<BeaconSyncing>,
    pub finality: Option<FinalityCheckpoints>,
    pub peers: Option<BeaconPeers>,
    pub version: Option<BeaconVersion>,
}

/// Beacon node source.
pub struct BeaconClient {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl BeaconClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: base_url.into(),
            client: http_client(timeout)?,
            timeout,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, SourceError> {
        let url = endpoint(&self.base_url, path);
        let body = get_json(&self.client, &url, self.timeout).await?;
        decode_envelope(path, body)
    }
}

impl Source for BeaconClient {
    fn id(&self) -> SourceId {
        SourceId::EthereumBeacon
    }

    async fn poll(&self) -> Result<Report, SourceError> {
        let (syncing, finality, peers, version) = tokio::join!(
            self.fetch::<BeaconSyncing>(SYNCING),
            self.fetch::<FinalityCheckpoints>(FINALITY),
            self.fetch::<BeaconPeers>(PEER_COUNT),
            self.fetch::<BeaconVersion>(VERSION),
        );

        let mut errors = Vec::new();
        let record = BeaconRecord {
            syncing: settle(SYNCING, syncing, &mut errors),
            finality: settle(FINALITY, finality, &mut errors),
            peers: settle(PEER_COUNT, peers, &mut errors),
            version: settle(VERSION, version, &mut errors),
        };

        finish(
            Report::new(Payload::EthereumBeacon(record)).with_call_errors(errors),
            4,
        )
    }
}
