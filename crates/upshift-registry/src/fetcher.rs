use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use upshift_core::Channel;

/// Bodies shorter than this cannot be a gzip tarball and carry a message.
pub const MIN_ARCHIVE_BYTES: usize = 100;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Source of release listings and release archives.
pub trait ManifestFetcher {
    fn list_versions(&self, channel: &Channel) -> Result<Vec<String>>;

    /// Raw listing lines of `<mode> <kind> <hash>\t<path>` for a revision.
    fn fetch_listing(&self, channel: &Channel, revision: &str) -> Result<Vec<String>>;

    fn fetch_archive(
        &self,
        channel: &Channel,
        revision: &str,
        paths: &[String],
    ) -> Result<ArchiveResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveResponse {
    Archive(Vec<u8>),
    /// The server answered with a message instead of an archive.
    Message(String),
}

impl ArchiveResponse {
    pub fn classify(body: Vec<u8>) -> Self {
        if body.len() < MIN_ARCHIVE_BYTES || body[..2] != GZIP_MAGIC {
            let message = String::from_utf8_lossy(&body).trim().to_string();
            return Self::Message(strip_error_prefix(&message).to_string());
        }
        Self::Archive(body)
    }
}

/// Accepts a JSON array of lines, a JSON string or `Error: ...` text as an
/// error, or plain newline separated lines.
pub fn decode_listing_response(body: &str) -> Result<Vec<String>> {
    let trimmed = body.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('"') {
        let value: Value =
            serde_json::from_str(trimmed).context("failed parsing release listing response")?;
        return lines_from_json(value);
    }
    if let Some(message) = trimmed.strip_prefix("Error:") {
        return Err(anyhow!("{}", message.trim()));
    }
    Ok(trimmed
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn decode_version_list(body: &str) -> Result<Vec<String>> {
    let versions = decode_listing_response(body)?;
    Ok(versions
        .into_iter()
        .map(|version| version.trim().to_string())
        .filter(|version| !version.is_empty())
        .collect())
}

fn lines_from_json(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(line) => Ok(line),
                other => Err(anyhow!("unexpected listing entry {other}")),
            })
            .collect(),
        Value::String(message) => Err(anyhow!("{}", strip_error_prefix(message.trim()))),
        other => Err(anyhow!("unexpected listing response {other}")),
    }
}

fn strip_error_prefix(message: &str) -> &str {
    message
        .strip_prefix("Error:")
        .map(str::trim_start)
        .unwrap_or(message)
}
