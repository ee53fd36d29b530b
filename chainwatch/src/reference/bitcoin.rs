//! Bitcoin height reference (blockchain.info-style plain-text endpoint).

use std::time::Duration;

use reqwest::Client;

use crate::client::{Source, get_text, http_client};
use crate::error::SourceError;
use crate::reference::ExternalReference;
use crate::types::{Payload, Report, SourceId};

/// Fetches the public chain height from a URL that answers with a bare
/// integer, e.g. `https://blockchain.info/q/getblockcount`.
pub struct BitcoinReference {
    url: String,
    client: Client,
    timeout: Duration,
}

impl BitcoinReference {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
            timeout,
        })
    }
}

impl Source for BitcoinReference {
    fn id(&self) -> SourceId {
        SourceId::BitcoinExternal
    }

    async fn poll(&self) -> Result<Report, SourceError> {
        let body = get_text(&self.client, &self.url, self.timeout).await?;
        let height = parse_height(&body)?;
        Ok(Report::new(Payload::External(ExternalReference {
            height: Some(height),
            participation_rate: None,
        })))
    }
}

fn parse_height(body: &str) -> Result<u64, SourceError> {
    body.trim()
        .parse::<u64>()
        .map_err(|e| SourceError::malformed("external height", e))
}
