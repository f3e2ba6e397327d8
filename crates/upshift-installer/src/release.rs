use std::fs;
use std::io;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use upshift_core::{installed_identifier, Channel, ReleaseRef};

use crate::layout::InstallationLayout;

/// The release the installation currently runs, as far as it can tell.
/// Without a usable channel stamp `default_channel` is assumed.
pub fn installed_release(
    layout: &InstallationLayout,
    channels: &[Channel],
    default_channel: &str,
) -> Result<ReleaseRef> {
    let stamp = installed_version_stamp(layout)?;
    let channel = read_channel_stamp(layout)?
        .filter(|name| channels.iter().any(|channel| channel.name == *name))
        .unwrap_or_else(|| default_channel.to_string());
    Ok(ReleaseRef::new(channel, installed_identifier(&stamp)))
}

/// Raw version stamp from the settings file, e.g. `1.4.0` or `1.4.0-1.x`.
pub fn installed_version_stamp(layout: &InstallationLayout) -> Result<String> {
    let path = layout.settings_path();
    layout
        .settings()
        .read_version(&path)?
        .ok_or_else(|| anyhow!("no version declaration found in {}", path.display()))
}

pub fn read_channel_stamp(layout: &InstallationLayout) -> Result<Option<String>> {
    let path = layout.channel_stamp_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read channel stamp {}", path.display()))
        }
    };
    let channel = raw.trim();
    if channel.is_empty() {
        return Ok(None);
    }
    Ok(Some(channel.to_string()))
}

/// Remembers the channel the installed files came from, a version alone
/// does not tell.
pub fn write_channel_stamp(layout: &InstallationLayout, channel: &str) -> Result<()> {
    layout.ensure_state_dir()?;
    let path = layout.channel_stamp_path();
    fs::write(&path, format!("{channel}\n"))
        .with_context(|| format!("failed to write channel stamp {}", path.display()))
}

/// Rewrites the version declaration of the settings file to `stamp`. The
/// previous file is copied aside first.
pub fn write_settings_version(layout: &InstallationLayout, stamp: &str) -> Result<()> {
    let path = layout.settings_path();
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rewritten = layout
        .settings()
        .declaration()
        .rewrite(&text, stamp)
        .ok_or_else(|| anyhow!("no version declaration found in {}", path.display()))?;

    let backup = layout.settings_backup_path();
    fs::copy(&path, &backup).with_context(|| {
        format!(
            "failed to copy {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    fs::write(&path, rewritten).with_context(|| {
        format!("could not write new version '{stamp}' into {}", path.display())
    })?;
    info!(version = stamp, "recorded installed version");
    Ok(())
}
