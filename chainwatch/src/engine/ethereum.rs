//! Ethereum snapshot → samples.

use std::time::SystemTime;

use super::SampleSet;
use super::formulas::{
    block_age_seconds, client_name, epoch_start_slot, parse_dotted_version, progress_ratio,
    slot_to_epoch, sync_lag, version_number, wei_to_gwei,
};
use super::snapshot::EthereumSnapshot;
use crate::client::ethereum::SyncStatus;
use crate::types::Chain;

/// Builds every Ethereum sample the snapshot currently supports.
pub(crate) fn samples(snap: &EthereumSnapshot, stale_after: u32, now: SystemTime) -> SampleSet {
    let mut out = SampleSet::new(Chain::Ethereum);
    execution(&mut out, snap, stale_after, now);
    beacon(&mut out, snap);
    external(&mut out, snap, stale_after);
    out
}

fn execution(out: &mut SampleSet, snap: &EthereumSnapshot, stale_after: u32, now: SystemTime) {
    let external = snap.external_height.fresh(stale_after);

    if let Some((&height, at)) = snap.block_number.latest() {
        out.gauge("block_height", "Current execution block height", height as f64, at);

        if let Some((&ext, ext_at)) = external {
            out.computed(
                "verification_progress",
                "Local height over external height (0..1)",
                progress_ratio(height, ext),
                at.max(ext_at),
            );
        }
    }

    if let Some((status, at)) = snap.syncing.latest() {
        out.gauge_opt(
            "syncing",
            "Whether the execution client is syncing (1/0)",
            Some(status.is_syncing()),
            at,
        );
        if let SyncStatus::Syncing {
            current_block,
            highest_block,
        } = status
        {
            out.gauge_opt("sync_current_block", "Current block while syncing", *current_block, at);
            out.gauge_opt(
                "sync_highest_block",
                "Highest known block while syncing",
                *highest_block,
                at,
            );
        }
    }

    if let Some((&peers, at)) = snap.peer_count.latest() {
        out.gauge("peer_count", "Execution client peer count", peers as f64, at);
    }
    if let Some((&wei, at)) = snap.gas_price_wei.latest() {
        out.gauge("gas_price_gwei", "Suggested gas price in gwei", wei_to_gwei(wei), at);
    }
    if let Some((&id, at)) = snap.chain_id.latest() {
        out.gauge("chain_id", "EIP-155 chain id", id as f64, at);
    }

    if let Some((block, at)) = snap.latest_block.latest() {
        if let Some(fee) = block.base_fee_wei {
            out.gauge(
                "base_fee_gwei",
                "Base fee of the latest block in gwei",
                wei_to_gwei(fee),
                at,
            );
        }
        if let Some(ts) = block.timestamp {
            out.gauge(
                "block_time_seconds",
                "Seconds since the latest block timestamp",
                block_age_seconds(now, ts),
                now,
            );
        }
    }

    if let Some((version, at)) = snap.client_version.latest() {
        client_info(out, ClientKind::Execution, version, at);
    }
}

fn beacon(out: &mut SampleSet, snap: &EthereumSnapshot) {
    let head_slot = snap
        .beacon_syncing
        .latest()
        .and_then(|(s, at)| Some((s.head_slot?, at)));

    if let Some((s, at)) = snap.beacon_syncing.latest() {
        if let Some(slot) = s.head_slot {
            out.gauge("beacon_head_slot", "Beacon head slot", slot as f64, at);
            out.gauge("beacon_head_epoch", "Beacon head epoch", slot_to_epoch(slot) as f64, at);
        }
        out.gauge_opt("beacon_sync_distance", "Slots behind the network head", s.sync_distance, at);
        out.gauge_opt(
            "beacon_is_syncing",
            "Whether the beacon node is syncing (1/0)",
            s.is_syncing,
            at,
        );
    }

    if let Some((f, at)) = snap.beacon_finality.latest() {
        if let Some(epoch) = f.finalized_epoch {
            out.gauge("beacon_finalized_epoch", "Latest finalized epoch", epoch as f64, at);
            out.gauge(
                "beacon_finalized_slot",
                "First slot of the latest finalized epoch",
                epoch_start_slot(epoch) as f64,
                at,
            );
            if let Some((slot, head_at)) = head_slot {
                out.gauge(
                    "beacon_finality_distance_epochs",
                    "Epochs between head and latest finalized checkpoint",
                    slot_to_epoch(slot).saturating_sub(epoch) as f64,
                    at.max(head_at),
                );
            }
        }
        out.gauge_opt(
            "beacon_justified_epoch",
            "Current justified epoch",
            f.current_justified_epoch,
            at,
        );
    }

    if let Some((p, at)) = snap.beacon_peers.latest() {
        out.gauge_opt("beacon_peer_count", "Beacon node connected peers", p.connected, at);
    }

    if let Some((v, at)) = snap.beacon_version.latest() {
        if let Some(version) = &v.version {
            client_info(out, ClientKind::Consensus, version, at);
        }
    }
}

fn external(out: &mut SampleSet, snap: &EthereumSnapshot, stale_after: u32) {
    if let Some((&ext, at)) = snap.external_height.latest() {
        out.gauge(
            "external_block_height",
            "Block height reported by the external reference",
            ext as f64,
            at,
        );
    }
    if let Some((&rate, at)) = snap.participation_rate.latest() {
        out.gauge(
            "external_participation_rate",
            "Network-wide attestation participation rate (0..1)",
            rate,
            at,
        );
    }

    let local = snap.block_number.latest();
    let external = snap.external_height.fresh(stale_after);
    if let (Some((&local, at)), Some((&ext, ext_at))) = (local, external) {
        out.gauge(
            "sync_lag",
            "Blocks behind the external reference",
            sync_lag(local, ext) as f64,
            at.max(ext_at),
        );
    }
}

#[derive(Clone, Copy)]
enum ClientKind {
    Execution,
    Consensus,
}

impl ClientKind {
    fn metric(self) -> &'static str {
        match self {
            ClientKind::Execution => "execution_client",
            ClientKind::Consensus => "consensus_client",
        }
    }

    fn info_help(self) -> &'static str {
        match self {
            ClientKind::Execution => "Execution client name and version",
            ClientKind::Consensus => "Consensus client name and version",
        }
    }

    fn version_help(self) -> &'static str {
        match self {
            ClientKind::Execution => "Execution client version (major*10000 + minor*100 + patch)",
            ClientKind::Consensus => "Consensus client version (major*10000 + minor*100 + patch)",
        }
    }
}

/// `<kind>_info{client,version} 1` and `<kind>_version` from a client
/// version string such as `Geth/v1.13.14-stable/linux-amd64/go1.21.7`.
fn client_info(out: &mut SampleSet, kind: ClientKind, raw: &str, at: SystemTime) {
    let version = parse_dotted_version(raw)
        .map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
        .unwrap_or_else(|| raw.to_string());
    out.info(
        &format!("{}_info", kind.metric()),
        kind.info_help(),
        [("client", client_name(raw)), ("version", version)],
        at,
    );
    out.computed(
        &format!("{}_version", kind.metric()),
        kind.version_help(),
        version_number(raw).map(|v| v as f64),
        at,
    );
}
