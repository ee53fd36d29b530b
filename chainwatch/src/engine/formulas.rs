//! Derived-metric formulas.
//!
//! All functions here are pure and total over their documented domain;
//! anything outside it is a [`ComputationError`] for that one metric.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ComputationError;

/// Beacon chain slots per epoch (mainnet preset).
pub const SLOTS_PER_EPOCH: u64 = 32;

const WEI_PER_GWEI: f64 = 1e9;

/// Blocks the local node is behind the reference. A reference below the
/// local height clamps to zero.
pub fn sync_lag(local_height: u64, external_height: u64) -> u64 {
    external_height.saturating_sub(local_height)
}

/// `local / external` clamped to `[0, 1]`.
pub fn progress_ratio(local_height: u64, external_height: u64) -> Result<f64, ComputationError> {
    if external_height == 0 {
        return Err(ComputationError::ZeroReference {
            metric: "verification_progress",
        });
    }
    Ok((local_height as f64 / external_height as f64).clamp(0.0, 1.0))
}

/// Seconds since `block_timestamp` (unix seconds). Clock skew that puts
/// the block in the future yields zero.
pub fn block_age_seconds(now: SystemTime, block_timestamp: u64) -> f64 {
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    (now - block_timestamp as f64).max(0.0)
}

pub fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / WEI_PER_GWEI
}

/// `major*10000 + minor*100 + patch`; `None` if minor or patch do not fit
/// in two digits.
pub fn encode_version(major: u64, minor: u64, patch: u64) -> Option<u64> {
    if minor >= 100 || patch >= 100 {
        return None;
    }
    major.checked_mul(10_000)?.checked_add(minor * 100 + patch)
}

/// Splits bitcoind's `MMmmpp` integer into `(major, minor, patch)`.
pub fn split_version(encoded: u64) -> (u64, u64, u64) {
    (encoded / 10_000, (encoded % 10_000) / 100, encoded % 100)
}

/// Finds the first dotted numeric run in a client version string and
/// returns `(major, minor, patch)`. Missing components are zero.
///
/// `"Geth/v1.13.14-stable-2bd6bd01/linux-amd64/go1.21.7"` → `(1, 13, 14)`,
/// `"Nimbus/v24.2.2-403c6b-stateofus"` → `(24, 2, 2)`.
pub fn parse_dotted_version(s: &str) -> Option<(u64, u64, u64)> {
    let bytes = s.as_bytes();
    let mut start = 0;

    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        let mut i = start;
        while count < 3 {
            let digits_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i == digits_start {
                break;
            }
            parts[count] = s[digits_start..i].parse().ok()?;
            count += 1;
            let more = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
            if i < bytes.len() && bytes[i] == b'.' && more {
                i += 1;
            } else {
                break;
            }
        }

        // A lone number ("Geth/linux-amd64") is not a version.
        if count >= 2 {
            return Some((parts[0], parts[1], parts[2]));
        }
        start = i.max(start + 1);
    }

    None
}

/// Encoded version of a client version string, see [`parse_dotted_version`].
pub fn version_number(s: &str) -> Result<u64, ComputationError> {
    parse_dotted_version(s)
        .and_then(|(major, minor, patch)| encode_version(major, minor, patch))
        .ok_or_else(|| ComputationError::InvalidInput {
            metric: "client_version",
            input: s.to_string(),
        })
}

/// Lower-cased client name, the segment before the first `/`.
pub fn client_name(version: &str) -> String {
    version
        .split('/')
        .next()
        .unwrap_or(version)
        .trim()
        .to_ascii_lowercase()
}

/// `log2` of bitcoind's hex chain work.
pub fn chain_work_log2(hex: &str) -> Result<f64, ComputationError> {
    let invalid = || ComputationError::InvalidInput {
        metric: "chain_work",
        input: hex.to_string(),
    };

    let digits = hex.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut work = 0f64;
    for c in digits.chars() {
        let d = c.to_digit(16).ok_or_else(invalid)?;
        work = work * 16.0 + f64::from(d);
    }

    if work <= 0.0 {
        return Err(invalid());
    }
    Ok(work.log2())
}

pub fn slot_to_epoch(slot: u64) -> u64 {
    slot / SLOTS_PER_EPOCH
}

pub fn epoch_start_slot(epoch: u64) -> u64 {
    epoch.saturating_mul(SLOTS_PER_EPOCH)
}
