//! Bitcoin snapshot → samples.

use std::collections::BTreeMap;
use std::time::SystemTime;

use super::SampleSet;
use super::formulas::{
    block_age_seconds, chain_work_log2, progress_ratio, split_version, sync_lag,
};
use super::snapshot::BitcoinSnapshot;
use crate::types::Chain;

/// Label for peers that did not announce a subversion.
const UNKNOWN_VERSION: &str = "unknown";

/// Builds every Bitcoin sample the snapshot currently supports.
pub(crate) fn samples(snap: &BitcoinSnapshot, stale_after: u32, now: SystemTime) -> SampleSet {
    let mut out = SampleSet::new(Chain::Bitcoin);
    let external = snap.external_height.fresh(stale_after);

    if let Some((b, at)) = snap.blockchain.latest() {
        out.gauge_opt("block_height", "Current block height", b.blocks, at);
        out.gauge_opt("block_headers", "Number of validated headers", b.headers, at);

        const PROGRESS: &str = "Verification progress (0..1)";
        match (b.verification_progress, b.blocks, external) {
            (Some(p), _, _) => out.gauge("verification_progress", PROGRESS, p, at),
            (None, Some(local), Some((ext, ext_at))) => out.computed(
                "verification_progress",
                PROGRESS,
                progress_ratio(local, *ext),
                at.max(ext_at),
            ),
            _ => {}
        }

        if let Some(ibd) = b.initial_block_download {
            out.gauge(
                "initial_block_download",
                "Whether the node is in initial block download (1/0)",
                f64::from(u8::from(ibd)),
                at,
            );
        }
        out.gauge_opt(
            "chain_size_bytes",
            "Size of the block and undo files on disk",
            b.size_on_disk,
            at,
        );
        out.gauge_opt("difficulty", "Current proof-of-work difficulty", b.difficulty, at);
        if let Some(work) = &b.chain_work {
            out.computed("chain_work", "log2 of total chain work", chain_work_log2(work), at);
        }
        if let Some(ts) = b.time {
            out.gauge(
                "block_time_seconds",
                "Seconds since the tip block timestamp",
                block_age_seconds(now, ts),
                now,
            );
        }
    }

    if let Some((n, at)) = snap.network.latest() {
        out.gauge_opt("connections_in", "Inbound peer connections", n.connections_in, at);
        out.gauge_opt("connections_out", "Outbound peer connections", n.connections_out, at);
        out.gauge_opt("connections_total", "Total peer connections", n.connections, at);
        out.gauge_opt("protocol_version", "P2P protocol version", n.protocol_version, at);

        if let Some(version) = n.version {
            let (major, minor, patch) = split_version(version);
            out.gauge("version", "Bitcoin Core version number (MMmmpp)", version as f64, at);
            out.gauge("version_major", "Bitcoin Core major version", major as f64, at);
            out.gauge("version_minor", "Bitcoin Core minor version", minor as f64, at);

            let network = snap
                .blockchain
                .value()
                .and_then(|b| b.chain.as_deref())
                .map_or_else(|| "unknown".to_string(), network_name);
            out.info(
                "node_info",
                "Bitcoin node information",
                [
                    ("version", version.to_string()),
                    ("version_string", format!("{major}.{minor}.{patch}")),
                    ("subversion", n.subversion.clone().unwrap_or_default()),
                    (
                        "protocol_version",
                        n.protocol_version.map(|p| p.to_string()).unwrap_or_default(),
                    ),
                    ("network", network),
                ],
                at,
            );
        }
    }

    if let Some((t, at)) = snap.net_totals.latest() {
        out.gauge_opt("network_bytes_recv_total", "Total bytes received", t.total_bytes_recv, at);
        out.gauge_opt("network_bytes_sent_total", "Total bytes sent", t.total_bytes_sent, at);
    }

    if let Some((m, at)) = snap.mempool.latest() {
        out.gauge_opt("mempool_size", "Number of transactions in the mempool", m.size, at);
        out.gauge_opt("mempool_bytes", "Sum of mempool transaction sizes", m.bytes, at);
        out.gauge_opt("mempool_usage", "Mempool memory usage in bytes", m.usage, at);
        out.gauge_opt(
            "mempool_min_fee",
            "Minimum fee rate for mempool acceptance (BTC/kvB)",
            m.min_fee,
            at,
        );
    }

    if let Some((peers, at)) = snap.peers.latest() {
        let mut counts: BTreeMap<&str, u64> = snap
            .peer_versions_seen
            .iter()
            .map(|v| (v.as_str(), 0))
            .collect();
        for peer in peers {
            let version = peer.subversion.as_deref().unwrap_or(UNKNOWN_VERSION);
            *counts.entry(version).or_default() += 1;
        }
        for (version, count) in counts {
            out.labeled(
                "peer_count_by_version",
                "Number of peers by version",
                [("version", version.to_string())],
                count as f64,
                at,
            );
        }
    }

    if let Some((ext, at)) = snap.external_height.latest() {
        out.gauge(
            "external_block_height",
            "Block height reported by the external reference",
            *ext as f64,
            at,
        );
    }

    let local = snap.blockchain.latest().and_then(|(b, at)| Some((b.blocks?, at)));
    if let (Some((local, at)), Some((ext, ext_at))) = (local, external) {
        out.gauge(
            "sync_lag",
            "Blocks behind the external reference",
            sync_lag(local, *ext) as f64,
            at.max(ext_at),
        );
    }

    out
}

fn network_name(chain: &str) -> String {
    match chain {
        "main" => "mainnet".to_string(),
        "test" => "testnet".to_string(),
        other => other.to_string(),
    }
}
