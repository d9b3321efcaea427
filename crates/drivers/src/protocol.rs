//! Protocol catalog: the client-facing projection of the driver registry.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

use crate::registry::DriverRegistry;

/// A browsable connection kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    pub title: String,
    pub category: String,
    pub icon: String,
    /// Stable feature tags projected from the driver's capabilities.
    pub features: Vec<String>,
    pub sort_order: i32,
}

/// Thread-safe protocol catalog, normally populated from the driver
/// registry at bootstrap.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: RwLock<HashMap<String, Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the catalog by projecting every registered driver.
    pub fn from_drivers(drivers: &DriverRegistry) -> Self {
        let registry = Self::new();
        for descriptor in drivers.describe_all() {
            let features = drivers
                .capabilities(&descriptor.id)
                .map(|caps| caps.feature_tags())
                .unwrap_or_default();
            registry.must_register(Protocol {
                id: descriptor.id,
                title: descriptor.title,
                category: descriptor.category,
                icon: descriptor.icon,
                features,
                sort_order: descriptor.sort_order,
            });
        }
        registry
    }

    pub fn register(&self, protocol: Protocol) -> Result<()> {
        if protocol.id.trim().is_empty() {
            return Err(Error::validation("protocol id must not be empty"));
        }
        let mut protocols = self.protocols.write();
        if protocols.contains_key(&protocol.id) {
            return Err(Error::conflict(format!(
                "protocol {} already registered",
                protocol.id
            )));
        }
        protocols.insert(protocol.id.clone(), protocol);
        Ok(())
    }

    /// Bootstrap-only variant: panics on a registration error.
    pub fn must_register(&self, protocol: Protocol) {
        if let Err(err) = self.register(protocol) {
            panic!("protocol registration failed: {err}");
        }
    }

    pub fn get(&self, id: &str) -> Option<Protocol> {
        self.protocols.read().get(id).cloned()
    }

    /// All protocols, sorted by sort order then ID.
    pub fn describe_all(&self) -> Vec<Protocol> {
        let mut out: Vec<Protocol> = self.protocols.read().values().cloned().collect();
        out.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        out
    }

    pub fn len(&self) -> usize {
        self.protocols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.read().is_empty()
    }
}
