use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;
use upshift_installer::HostHooks;

/// Host behavior available without a running application: incompatible
/// modules come from the configuration and cannot be uninstalled from here.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredHostHooks {
    incompatible_modules: BTreeMap<String, Vec<String>>,
}

impl ConfiguredHostHooks {
    pub fn new(incompatible_modules: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            incompatible_modules,
        }
    }
}

impl HostHooks for ConfiguredHostHooks {
    fn incompatible_modules(&self, version: &str) -> Result<Vec<String>> {
        Ok(self
            .incompatible_modules
            .get(version)
            .cloned()
            .unwrap_or_default())
    }

    fn remove_module(&self, module: &str) -> Vec<String> {
        warn!(module, "module removal needs the host application");
        vec![format!(
            "module {module} has to be uninstalled from the application"
        )]
    }
}
