use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::debug;
use upshift_core::Channel;

use crate::fetcher::{decode_listing_response, decode_version_list, ArchiveResponse, ManifestFetcher};

/// Talks to a channel API with form encoded POST requests.
#[derive(Debug, Clone)]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("upshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { client })
    }

    fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("request to {url} was rejected"))?;
        let body = response
            .bytes()
            .with_context(|| format!("failed reading response from {url}"))?;
        Ok(body.to_vec())
    }
}

impl ManifestFetcher for HttpManifestFetcher {
    fn list_versions(&self, channel: &Channel) -> Result<Vec<String>> {
        let body = self.post_form(&channel.api_url, &[("list", channel.kind.as_str().to_string())])?;
        decode_version_list(&String::from_utf8_lossy(&body))
            .with_context(|| format!("failed listing versions of channel '{}'", channel.name))
    }

    fn fetch_listing(&self, channel: &Channel, revision: &str) -> Result<Vec<String>> {
        debug!(channel = %channel.name, revision, "fetching release listing");
        let body = self.post_form(&channel.api_url, &[("listrev", revision.to_string())])?;
        decode_listing_response(&String::from_utf8_lossy(&body))
    }

    fn fetch_archive(
        &self,
        channel: &Channel,
        revision: &str,
        paths: &[String],
    ) -> Result<ArchiveResponse> {
        debug!(channel = %channel.name, revision, files = paths.len(), "fetching release archive");
        let mut form = Vec::with_capacity(paths.len() + 1);
        form.push(("revision", revision.to_string()));
        form.extend(paths.iter().map(|path| ("archive[]", path.clone())));
        let body = self.post_form(&channel.api_url, &form)?;
        Ok(ArchiveResponse::classify(body))
    }
}
