//! Process-wide list of source drivers.

use super::{ConnOpts, Driver, Reader};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Ordered, append-only set of drivers. The first driver that accepts a
/// DSN wins.
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<Vec<Arc<dyn Driver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a driver
    pub fn register(&self, driver: Arc<dyn Driver>) {
        if let Ok(mut drivers) = self.drivers.write() {
            drivers.push(driver);
        }
    }

    /// Names of the registered drivers, in order
    pub fn drivers(&self) -> Vec<String> {
        self.drivers
            .read()
            .map(|d| d.iter().map(|d| d.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Driver that accepts the DSN
    pub fn find(&self, dsn: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .read()
            .ok()?
            .iter()
            .find(|d| d.is_supported(dsn))
            .cloned()
    }

    /// Open a reader for the DSN
    pub fn connect(&self, opts: &ConnOpts) -> Result<Box<dyn Reader>> {
        let driver = self.find(&opts.dsn).ok_or_else(|| Error::UnsupportedSource {
            dsn: opts.dsn.clone(),
        })?;
        debug!(driver = driver.name(), dsn = %opts.dsn, "connecting source");
        driver.new_connection(opts)
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    registry.register(Arc::new(super::duckdb::DuckDbDriver));
    registry
});

/// The process-wide registry, with the bundled drivers registered
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Append a driver to the process-wide registry
pub fn register(driver: Arc<dyn Driver>) {
    REGISTRY.register(driver);
}

/// Open a reader through the process-wide registry
pub fn connect(opts: &ConnOpts) -> Result<Box<dyn Reader>> {
    REGISTRY.connect(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ReadTableOpt, RowSender};

    struct Named(&'static str, &'static str);

    struct Empty(&'static str);

    impl Reader for Empty {
        fn get_structure(&self) -> Result<String> {
            Ok(String::new())
        }
        fn get_tables(&self) -> Result<Vec<String>> {
            Ok(vec![self.0.to_string()])
        }
        fn get_columns(&self, _table: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn format_column(&self, table: &str, column: &str) -> String {
            format!("{}.{}", table, column)
        }
        fn format_table(&self, table: &str) -> String {
            table.to_string()
        }
        fn read_subset(&self, _: &str, _: usize, _: RowSender, _: &ReadTableOpt) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    impl Driver for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn is_supported(&self, dsn: &str) -> bool {
            dsn.starts_with(self.1)
        }
        fn new_connection(&self, _opts: &ConnOpts) -> Result<Box<dyn Reader>> {
            Ok(Box::new(Empty(self.0)))
        }
    }

    #[test]
    fn test_first_match_wins() {
        let registry = Registry::new();
        registry.register(Arc::new(Named("first", "mock://")));
        registry.register(Arc::new(Named("second", "mock://")));

        let reader = registry.connect(&ConnOpts::new("mock://x")).unwrap();
        assert_eq!(reader.get_tables().unwrap(), vec!["first"]);
        assert_eq!(registry.drivers(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsupported_dsn() {
        let registry = Registry::new();
        registry.register(Arc::new(Named("mock", "mock://")));

        match registry.connect(&ConnOpts::new("oracle://db")) {
            Err(Error::UnsupportedSource { dsn }) => assert_eq!(dsn, "oracle://db"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_global_registry_has_duckdb() {
        assert!(registry().find("duckdb://:memory:").is_some());
    }
}
