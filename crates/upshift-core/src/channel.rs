use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Tags,
    Branches,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Branches => "branches",
        }
    }
}

/// A release source: either tagged releases or moving branches, served by
/// one API endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
    pub api_url: String,
}

pub fn find_channel<'a>(channels: &'a [Channel], name: &str) -> Result<&'a Channel> {
    channels
        .iter()
        .find(|channel| channel.name == name)
        .ok_or_else(|| anyhow!("unknown release channel '{name}'"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub channel: String,
    pub version: String,
}

impl ReleaseRef {
    pub fn new(channel: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            version: version.into(),
        }
    }

    /// Key under which the release manifest is stored.
    pub fn key(&self) -> String {
        format!("{}/{}", self.channel, self.version)
    }
}

impl fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.channel)
    }
}
