use anyhow::Result;
use upshift_core::{find_channel, Channel, Manifest, PathFilterSet, ReleaseRef};
use upshift_registry::ManifestFetcher;
use upshift_security::ContentHasher;

use crate::hooks::HostHooks;
use crate::layout::InstallationLayout;
use crate::migrate::SchemaMigrator;
use crate::script::ScriptRunner;

/// Collaborators shared by the compare and update engines.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub layout: &'a InstallationLayout,
    pub channels: &'a [Channel],
    pub fetcher: &'a dyn ManifestFetcher,
    pub hooks: &'a dyn HostHooks,
    pub hasher: &'a ContentHasher,
    pub runner: &'a dyn ScriptRunner,
    pub migrator: Option<&'a dyn SchemaMigrator>,
}

impl<'a> EngineContext<'a> {
    pub fn channel(&self, name: &str) -> Result<&'a Channel> {
        find_channel(self.channels, name)
    }

    /// Fetches and filters the listing of `release`.
    pub fn fetch_manifest(&self, release: &ReleaseRef, ignore_theme: bool) -> Result<Manifest> {
        let channel = self.channel(&release.channel)?;
        let lines = self.fetcher.fetch_listing(channel, &release.version)?;
        let filter = PathFilterSet::release(ignore_theme)?;
        Manifest::from_listing(lines, &filter, &self.layout.remap())
    }
}
