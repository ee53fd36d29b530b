//! Core types passed between the collection side and the exposition side.
//!
//! Sources produce [`CollectionResult`]s, the engine turns snapshots into
//! [`MetricSample`]s, and the sample table keys them by [`SampleKey`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use crate::client::beacon::BeaconRecord;
use crate::client::bitcoin::BitcoinNodeRecord;
use crate::client::ethereum::ExecutionRecord;
use crate::error::SourceError;
use crate::reference::ExternalReference;

/// Label set of a sample. A `BTreeMap` keeps keys unique and gives the
/// canonical (sorted) order used for identity and rendering.
pub type Labels = BTreeMap<String, String>;

/// Chain family being monitored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

impl Chain {
    /// Metric name prefix for this chain.
    pub fn prefix(self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One independently scheduled data source.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    /// bitcoind JSON-RPC.
    BitcoinNode,
    /// Third-party Bitcoin height reference.
    BitcoinExternal,
    /// Ethereum execution client JSON-RPC.
    EthereumExecution,
    /// Ethereum consensus client (beacon node REST API).
    EthereumBeacon,
    /// Public Ethereum JSON-RPC / participation reference.
    EthereumExternal,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::BitcoinNode,
        SourceId::BitcoinExternal,
        SourceId::EthereumExecution,
        SourceId::EthereumBeacon,
        SourceId::EthereumExternal,
    ];

    pub fn chain(self) -> Chain {
        match self {
            SourceId::BitcoinNode | SourceId::BitcoinExternal => Chain::Bitcoin,
            SourceId::EthereumExecution | SourceId::EthereumBeacon | SourceId::EthereumExternal => {
                Chain::Ethereum
            }
        }
    }

    /// Short source name, used in metric names and as the `source` label.
    pub fn name(self) -> &'static str {
        match self {
            SourceId::BitcoinNode => "node",
            SourceId::EthereumExecution => "execution",
            SourceId::EthereumBeacon => "beacon",
            SourceId::BitcoinExternal | SourceId::EthereumExternal => "external",
        }
    }

    pub fn is_external(self) -> bool {
        matches!(self, SourceId::BitcoinExternal | SourceId::EthereumExternal)
    }

    /// Sources belonging to `chain`, in a fixed order.
    pub fn for_chain(chain: Chain) -> impl Iterator<Item = SourceId> {
        Self::ALL.into_iter().filter(move |s| s.chain() == chain)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.chain().prefix(), self.name())
    }
}

/// Identity of a sample in the registry: metric name plus label set.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub name: String,
    pub labels: Labels,
}

/// Latest value of one metric identity.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: String,
    /// `# HELP` text. Not part of the identity.
    pub help: &'static str,
    pub labels: Labels,
    pub value: f64,
    /// Collection time of the data the value was derived from.
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(
        name: impl Into<String>,
        help: &'static str,
        value: f64,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            help,
            labels: Labels::new(),
            value,
            timestamp,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> SampleKey {
        SampleKey {
            name: self.name.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Decoded data produced by one successful poll.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    BitcoinNode(BitcoinNodeRecord),
    EthereumExecution(ExecutionRecord),
    EthereumBeacon(BeaconRecord),
    External(ExternalReference),
}

/// A call that failed inside an otherwise successful poll.
#[derive(Clone, Debug, PartialEq)]
pub struct CallError {
    pub call: &'static str,
    pub error: SourceError,
}

/// Successful poll: the payload plus any calls that failed within it.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub payload: Payload,
    pub call_errors: Vec<CallError>,
}

impl Report {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            call_errors: Vec::new(),
        }
    }

    pub fn with_call_errors(mut self, call_errors: Vec<CallError>) -> Self {
        self.call_errors = call_errors;
        self
    }
}

/// Outcome of one poll cycle for one source. Never dropped: the engine
/// applies every result to the snapshot.
#[derive(Clone, Debug)]
pub struct CollectionResult {
    pub source: SourceId,
    pub collected_at: SystemTime,
    pub outcome: Result<Report, SourceError>,
}
