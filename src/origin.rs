//! Access to the upstream origin media server: metadata GET and streaming
//! file download, both authenticated by an opaque token query parameter.
//! Treated as an opaque collaborator (section 1): only the shape this
//! worker consumes is modeled, not the origin's catalog/auth internals.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::coordinator::OriginCredentials;

/// The origin's metadata response, decoded into a typed record with every
/// optional field explicit rather than walked as untyped JSON (section 9,
/// Dynamic JSON access: a missing `part_key` becomes a precise error, not a
/// null-chain bug).
#[derive(Debug, Deserialize)]
pub struct OriginMetadataResponse {
    #[serde(default)]
    pub media: Vec<OriginMedia>,
}

#[derive(Debug, Deserialize)]
pub struct OriginMedia {
    #[serde(default)]
    pub part: Vec<OriginPart>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OriginPart {
    pub key: Option<String>,
}

/// The fields the job pipeline actually needs, extracted from the typed
/// response. A missing `part_key` is the `metadata_incomplete` failure cause.
#[derive(Debug, Clone)]
pub struct OriginMetadata {
    pub part_key: String,
    pub duration_seconds: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum OriginFetchError {
    #[error("origin request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("origin metadata is missing a part key")]
    MissingPartKey,
    #[error("failed to write downloaded file: {0}")]
    Io(#[from] std::io::Error),
}

pub struct OriginClient {
    http: Client,
}

impl OriginClient {
    pub fn new(tls_verify: bool) -> Self {
        let http = Client::builder()
            .danger_accept_invalid_certs(!tls_verify)
            .build()
            .expect("origin http client builds with the configured TLS policy");
        OriginClient { http }
    }

    pub async fn fetch_metadata(
        &self,
        creds: &OriginCredentials,
        rating_key: &str,
    ) -> Result<OriginMetadata, OriginFetchError> {
        let url = format!(
            "{}/library/metadata/{}?token={}",
            creds.origin_base_url.trim_end_matches('/'),
            rating_key,
            creds.origin_token
        );
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let parsed: OriginMetadataResponse = resp.json().await?;
        let media = parsed.media.into_iter().next();
        let part_key = media
            .as_ref()
            .and_then(|m| m.part.first())
            .and_then(|p| p.key.clone())
            .ok_or(OriginFetchError::MissingPartKey)?;
        let duration_seconds = media
            .and_then(|m| m.duration_ms)
            .map(|ms| ms as f64 / 1000.0)
            .unwrap_or(0.0);
        Ok(OriginMetadata {
            part_key,
            duration_seconds,
        })
    }

    pub async fn download(
        &self,
        creds: &OriginCredentials,
        part_key: &str,
        dest: &Path,
    ) -> Result<(), OriginFetchError> {
        let url = format!(
            "{}{}?download=1&token={}",
            creds.origin_base_url.trim_end_matches('/'),
            part_key,
            creds.origin_token
        );
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
