//! Per-chain snapshots of last-known decoded state.
//!
//! A snapshot is split into [`Section`]s, one per node call. A section is
//! replaced whole when its call succeeds and left untouched when it fails;
//! either way its consecutive-failure count is updated.

use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::client::beacon::{BeaconPeers, BeaconSyncing, BeaconVersion, FinalityCheckpoints};
use crate::client::bitcoin::{BlockchainInfo, MempoolInfo, NetTotals, NetworkInfo, PeerInfo};
use crate::client::ethereum::{LatestBlock, SyncStatus};
use crate::types::{Payload, SourceId};

/// Last-known value of one node call.
#[derive(Clone, Debug, PartialEq)]
pub struct Section<T> {
    value: Option<T>,
    updated_at: Option<SystemTime>,
    consecutive_failures: u32,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated_at: None,
            consecutive_failures: 0,
        }
    }
}

impl<T> Section<T> {
    /// Applies one call outcome: `Some` replaces the value, `None` counts a
    /// failure and keeps the previous value.
    pub fn record(&mut self, outcome: Option<T>, at: SystemTime) {
        match outcome {
            Some(value) => {
                self.value = Some(value);
                self.updated_at = Some(at);
                self.consecutive_failures = 0;
            }
            None => self.fail(),
        }
    }

    pub fn fail(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Value together with the time it was collected.
    pub fn latest(&self) -> Option<(&T, SystemTime)> {
        Some((self.value.as_ref()?, self.updated_at?))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_stale(&self, stale_after: u32) -> bool {
        self.consecutive_failures >= stale_after
    }

    /// Stale and still carrying a last-known value. A section that never
    /// answered (or whose call is not configured) exports nothing, so it
    /// has nothing to flag.
    pub fn holds_stale_value(&self, stale_after: u32) -> bool {
        self.value.is_some() && self.is_stale(stale_after)
    }

    /// Like [`Section::latest`], but `None` once the section is stale.
    pub fn fresh(&self, stale_after: u32) -> Option<(&T, SystemTime)> {
        if self.is_stale(stale_after) {
            return None;
        }
        self.latest()
    }
}

/// Last-known Bitcoin state.
#[derive(Clone, Debug, Default)]
pub struct BitcoinSnapshot {
    pub blockchain: Section<BlockchainInfo>,
    pub network: Section<NetworkInfo>,
    pub net_totals: Section<NetTotals>,
    pub mempool: Section<MempoolInfo>,
    pub peers: Section<Vec<PeerInfo>>,
    /// Every peer subversion ever observed, so vanished versions can be
    /// reported as zero instead of keeping their last count.
    pub peer_versions_seen: BTreeSet<String>,
    pub external_height: Section<u64>,
}

impl BitcoinSnapshot {
    /// Applies a poll outcome of `source`. `None` means the whole poll
    /// failed and every section the source owns counts a failure.
    pub fn apply(&mut self, source: SourceId, payload: Option<Payload>, at: SystemTime) {
        match (source, payload) {
            (SourceId::BitcoinNode, Some(Payload::BitcoinNode(r))) => {
                if let Some(peers) = &r.peers {
                    self.peer_versions_seen
                        .extend(peers.iter().filter_map(|p| p.subversion.clone()));
                }
                self.blockchain.record(r.blockchain, at);
                self.network.record(r.network, at);
                self.net_totals.record(r.net_totals, at);
                self.mempool.record(r.mempool, at);
                self.peers.record(r.peers, at);
            }
            (SourceId::BitcoinNode, None) => {
                self.blockchain.fail();
                self.network.fail();
                self.net_totals.fail();
                self.mempool.fail();
                self.peers.fail();
            }
            (SourceId::BitcoinExternal, Some(Payload::External(r))) => {
                self.external_height.record(r.height, at);
            }
            (SourceId::BitcoinExternal, None) => self.external_height.fail(),
            (source, payload) => {
                tracing::debug!(%source, ?payload, "ignoring result not owned by bitcoin snapshot");
            }
        }
    }

    /// Whether any section fed by `source` holds a value that has gone
    /// stale, including through calls failing inside partial polls.
    pub fn has_stale_section(&self, source: SourceId, stale_after: u32) -> bool {
        match source {
            SourceId::BitcoinNode => [
                self.blockchain.holds_stale_value(stale_after),
                self.network.holds_stale_value(stale_after),
                self.net_totals.holds_stale_value(stale_after),
                self.mempool.holds_stale_value(stale_after),
                self.peers.holds_stale_value(stale_after),
            ]
            .contains(&true),
            SourceId::BitcoinExternal => self.external_height.holds_stale_value(stale_after),
            _ => false,
        }
    }
}

/// Last-known Ethereum state (execution, beacon and external reference).
#[derive(Clone, Debug, Default)]
pub struct EthereumSnapshot {
    pub block_number: Section<u64>,
    pub syncing: Section<SyncStatus>,
    pub peer_count: Section<u64>,
    pub gas_price_wei: Section<u128>,
    pub chain_id: Section<u64>,
    pub client_version: Section<String>,
    pub latest_block: Section<LatestBlock>,

    pub beacon_syncing: Section<BeaconSyncing>,
    pub beacon_finality: Section<FinalityCheckpoints>,
    pub beacon_peers: Section<BeaconPeers>,
    pub beacon_version: Section<BeaconVersion>,

    pub external_height: Section<u64>,
    pub participation_rate: Section<f64>,
}

impl EthereumSnapshot {
    /// See [`BitcoinSnapshot::apply`].
    pub fn apply(&mut self, source: SourceId, payload: Option<Payload>, at: SystemTime) {
        match (source, payload) {
            (SourceId::EthereumExecution, Some(Payload::EthereumExecution(r))) => {
                self.block_number.record(r.block_number, at);
                self.syncing.record(r.syncing, at);
                self.peer_count.record(r.peer_count, at);
                self.gas_price_wei.record(r.gas_price_wei, at);
                self.chain_id.record(r.chain_id, at);
                self.client_version.record(r.client_version, at);
                self.latest_block.record(r.latest_block, at);
            }
            (SourceId::EthereumExecution, None) => {
                self.block_number.fail();
                self.syncing.fail();
                self.peer_count.fail();
                self.gas_price_wei.fail();
                self.chain_id.fail();
                self.client_version.fail();
                self.latest_block.fail();
            }
            (SourceId::EthereumBeacon, Some(Payload::EthereumBeacon(r))) => {
                self.beacon_syncing.record(r.syncing, at);
                self.beacon_finality.record(r.finality, at);
                self.beacon_peers.record(r.peers, at);
                self.beacon_version.record(r.version, at);
            }
            (SourceId::EthereumBeacon, None) => {
                self.beacon_syncing.fail();
                self.beacon_finality.fail();
                self.beacon_peers.fail();
                self.beacon_version.fail();
            }
            (SourceId::EthereumExternal, Some(Payload::External(r))) => {
                self.external_height.record(r.height, at);
                self.participation_rate.record(r.participation_rate, at);
            }
            (SourceId::EthereumExternal, None) => {
                self.external_height.fail();
                self.participation_rate.fail();
            }
            (source, payload) => {
                tracing::debug!(
                    %source,
                    ?payload,
                    "ignoring result not owned by ethereum snapshot"
                );
            }
        }
    }

    /// See [`BitcoinSnapshot::has_stale_section`].
    pub fn has_stale_section(&self, source: SourceId, stale_after: u32) -> bool {
        match source {
            SourceId::EthereumExecution => [
                self.block_number.holds_stale_value(stale_after),
                self.syncing.holds_stale_value(stale_after),
                self.peer_count.holds_stale_value(stale_after),
                self.gas_price_wei.holds_stale_value(stale_after),
                self.chain_id.holds_stale_value(stale_after),
                self.client_version.holds_stale_value(stale_after),
                self.latest_block.holds_stale_value(stale_after),
            ]
            .contains(&true),
            SourceId::EthereumBeacon => [
                self.beacon_syncing.holds_stale_value(stale_after),
                self.beacon_finality.holds_stale_value(stale_after),
                self.beacon_peers.holds_stale_value(stale_after),
                self.beacon_version.holds_stale_value(stale_after),
            ]
            .contains(&true),
            SourceId::EthereumExternal => {
                self.external_height.holds_stale_value(stale_after)
                    || self.participation_rate.holds_stale_value(stale_after)
            }
            _ => false,
        }
    }
}
