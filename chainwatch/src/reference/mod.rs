//! Clients for third-party reference services.
//!
//! These run in their own failure domain: they have a stricter timeout and
//! a slower cadence than node sources, and their failures only affect the
//! metrics derived from them (sync lag, verification progress).

pub mod bitcoin;
pub mod ethereum;

pub use bitcoin::BitcoinReference;
pub use ethereum::EthereumReference;

/// Comparison data point fetched from outside the operator's control.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalReference {
    /// Chain height as seen by the reference service.
    pub height: Option<u64>,
    /// Network-wide attestation participation (0..1), Ethereum only.
    pub participation_rate: Option<f64>,
}
