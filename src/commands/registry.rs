use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use super::{
    Command, DeleteScan, GetMemoryUsage, GetPerformance, GetScannerDetails, GetScans, GetVersion,
    GetVts, HelpCommand, StartScan, StopScan,
};

/// Catalogue of protocol operations, keyed by wire name.
///
/// Built explicitly at process start; registering the same name twice is a
/// bootstrap error, not something to paper over at dispatch time.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry::default()
    }

    /// Catalogue holding every built-in operation.
    pub fn with_builtin_commands() -> Result<Self> {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(HelpCommand))?;
        registry.register(Arc::new(GetVersion))?;
        registry.register(Arc::new(GetPerformance))?;
        registry.register(Arc::new(GetScannerDetails))?;
        registry.register(Arc::new(GetMemoryUsage))?;
        registry.register(Arc::new(StartScan))?;
        registry.register(Arc::new(StopScan))?;
        registry.register(Arc::new(DeleteScan))?;
        registry.register(Arc::new(GetScans))?;
        registry.register(Arc::new(GetVts))?;
        Ok(registry)
    }

    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let name = command.name();
        if self.commands.contains_key(name) {
            bail!("duplicate command registration for '{name}'");
        }
        debug!(command = name, "registered protocol command");
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// All commands in stable name order, for help generation.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Command>> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue_is_complete() {
        let registry = CommandRegistry::with_builtin_commands().unwrap();
        for name in [
            "help",
            "get_version",
            "get_performance",
            "get_scanner_details",
            "get_memory_usage",
            "start_scan",
            "stop_scan",
            "delete_scan",
            "get_scans",
            "get_vts",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn duplicate_registration_is_a_startup_error() {
        let mut registry = CommandRegistry::with_builtin_commands().unwrap();
        let err = registry.register(Arc::new(HelpCommand)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
