//! Server binary update
//!
//! Downloads a release, verifies its SHA-256 digest against what the
//! coordinator announced and stages it next to the running binary. The swap
//! into place is observed by the process supervisor after the coordinator
//! follows up with `SignalService(restart)`; this module never restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("release info is empty")]
    EmptyReleaseInfo,

    #[error("staging failed: {0}")]
    Staging(String),
}

/// What the coordinator sends to `ServerUpdate`. General codec on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdateInfo {
    pub url: String,
    pub sha256_hex: String,
    pub time: Option<DateTime<Utc>>,
    pub release_info: String,
}

/// Downloads, verifies and stages the new binary. Returns the staged path.
pub async fn apply_server_update(
    info: &ServerUpdateInfo,
    staging_dir: &Path,
) -> Result<PathBuf, UpdateError> {
    if info.release_info.is_empty() {
        return Err(UpdateError::EmptyReleaseInfo);
    }

    let response = reqwest::get(&info.url)
        .await
        .map_err(|e| UpdateError::Download(e.to_string()))?;
    if !response.status().is_success() {
        return Err(UpdateError::Download(format!(
            "unexpected status {}",
            response.status()
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| UpdateError::Download(e.to_string()))?;

    let actual = hex::encode(Sha256::digest(&body));
    if !actual.eq_ignore_ascii_case(&info.sha256_hex) {
        return Err(UpdateError::ChecksumMismatch {
            expected: info.sha256_hex.clone(),
            actual,
        });
    }

    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| UpdateError::Staging(e.to_string()))?;
    let staged = staging_dir.join(format!("opal-peer.{}", sanitize(&info.release_info)));
    tokio::fs::write(&staged, &body)
        .await
        .map_err(|e| UpdateError::Staging(e.to_string()))?;
    Ok(staged)
}

fn sanitize(release: &str) -> String {
    release
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_names_are_sanitized() {
        assert_eq!(sanitize("2026-08-02T00:00:00Z"), "2026-08-02T00_00_00Z");
    }

    #[tokio::test]
    async fn empty_release_info_is_rejected() {
        let info = ServerUpdateInfo {
            url: "http://localhost:1/none".to_string(),
            sha256_hex: "00".to_string(),
            time: None,
            release_info: String::new(),
        };
        let err = apply_server_update(&info, Path::new("/tmp/opal-staging"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::EmptyReleaseInfo));
    }
}
