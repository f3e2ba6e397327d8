use anyhow::Result;

/// What the hosting application contributes to a compare or update. Every
/// method has a neutral default.
pub trait HostHooks {
    /// Unmet requirements of release `version`; empty when all are met.
    fn check_requirements(&self, _version: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Installed modules known to break under release `version`.
    fn incompatible_modules(&self, _version: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Deactivates and deletes one module; returns what went wrong.
    fn remove_module(&self, _module: &str) -> Vec<String> {
        Vec::new()
    }

    /// Runs the backward compatibility database upgrades after a swap;
    /// returns what went wrong.
    fn database_upgrades(&self) -> Vec<String> {
        Vec::new()
    }
}
