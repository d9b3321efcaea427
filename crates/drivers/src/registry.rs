//! Concurrency-safe catalog of registered drivers.
//!
//! Writes happen only during bootstrap; lookups are hot, so the map sits
//! behind a read-preferring lock.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

use crate::capability::DriverCapabilities;
use crate::template::CredentialTemplate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static descriptor shown in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    pub id: String,
    pub module: String,
    pub title: String,
    pub category: String,
    pub icon: String,
    pub version: String,
    pub sort_order: i32,
}

/// Everything the core needs to launch a session.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub session_id: String,
    pub connection_id: String,
    pub user_id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub settings: BTreeMap<String, serde_json::Value>,
    /// Decrypted credential fields, validated against the driver's template.
    pub credentials: serde_json::Value,
}

/// A live session produced by a driver. Transport details stay inside the
/// driver; the core only needs identity and teardown.
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync + std::fmt::Debug {
    fn session_id(&self) -> &str;
    async fn close(&self) -> Result<()>;
}

/// A protocol module: descriptor, capabilities, credential shape, launch.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    fn descriptor(&self) -> DriverDescriptor;
    fn capabilities(&self) -> DriverCapabilities;
    fn credential_template(&self) -> CredentialTemplate;
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SessionHandle>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe map of driver ID → driver.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver. Errors on an empty or duplicate ID; the registry
    /// is unchanged on error.
    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let id = driver.descriptor().id;
        if id.trim().is_empty() {
            return Err(Error::validation("driver id must not be empty"));
        }

        let mut drivers = self.drivers.write();
        if drivers.contains_key(&id) {
            return Err(Error::conflict(format!("driver {id} already registered")));
        }
        tracing::info!(driver_id = %id, "driver registered");
        drivers.insert(id, driver);
        Ok(())
    }

    /// Bootstrap-only variant: panics on a registration error.
    pub fn must_register(&self, driver: Arc<dyn Driver>) {
        if let Err(err) = self.register(driver) {
            panic!("driver registration failed: {err}");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().get(id).cloned()
    }

    /// All descriptors, sorted by sort order then ID. The order is stable
    /// across calls.
    pub fn describe_all(&self) -> Vec<DriverDescriptor> {
        let mut out: Vec<DriverDescriptor> = self
            .drivers
            .read()
            .values()
            .map(|d| d.descriptor())
            .collect();
        out.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        out
    }

    /// Capability snapshot for one driver. The returned value is the
    /// caller's own copy, extras map included.
    pub fn capabilities(&self, id: &str) -> Option<DriverCapabilities> {
        self.drivers.read().get(id).map(|d| d.capabilities())
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubDriver;
    use super::*;

    #[test]
    fn register_and_describe_round_trip() {
        let registry = DriverRegistry::new();
        let driver = StubDriver::new("ssh", 10);
        registry.register(driver.clone()).unwrap();

        let described = registry.describe_all();
        assert_eq!(described.len(), 1);
        assert_eq!(described[0], driver.descriptor);
    }

    #[test]
    fn duplicate_id_is_rejected_and_registry_unchanged() {
        let registry = DriverRegistry::new();
        registry.register(StubDriver::new("ssh", 10)).unwrap();

        let err = registry.register(StubDriver::new("ssh", 99)).unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Conflict);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.describe_all()[0].sort_order, 10);
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = DriverRegistry::new();
        let err = registry.register(StubDriver::new("  ", 1)).unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Validation);
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "driver registration failed")]
    fn must_register_panics_on_duplicate() {
        let registry = DriverRegistry::new();
        registry.must_register(StubDriver::new("vnc", 1));
        registry.must_register(StubDriver::new("vnc", 1));
    }

    #[test]
    fn describe_all_sorts_by_order_then_id() {
        let registry = DriverRegistry::new();
        registry.register(StubDriver::new("vnc", 20)).unwrap();
        registry.register(StubDriver::new("rdp", 20)).unwrap();
        registry.register(StubDriver::new("ssh", 10)).unwrap();

        let ids: Vec<String> = registry.describe_all().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["ssh", "rdp", "vnc"]);
    }

    #[test]
    fn capabilities_are_a_private_copy() {
        let registry = DriverRegistry::new();
        registry.register(StubDriver::new("ssh", 1)).unwrap();

        let mut caps = registry.capabilities("ssh").unwrap();
        caps.extras.insert("mutated".into(), true);

        // The registry's view is unaffected by caller mutation.
        assert!(registry.capabilities("ssh").unwrap().extras.is_empty());
    }

    #[tokio::test]
    async fn launch_produces_a_handle() {
        let registry = DriverRegistry::new();
        registry.register(StubDriver::new("ssh", 1)).unwrap();

        let driver = registry.get("ssh").unwrap();
        let handle = driver
            .launch(LaunchRequest {
                session_id: "s1".into(),
                connection_id: "c1".into(),
                user_id: "u1".into(),
                host: Some("host.example".into()),
                port: Some(22),
                settings: BTreeMap::new(),
                credentials: serde_json::json!({"username": "root"}),
            })
            .await
            .unwrap();
        assert_eq!(handle.session_id(), "s1");
        handle.close().await.unwrap();
    }
}
