//! Protocol catalog: maps a protocol tag to the factory building its sessions.

use crate::error::{BackgroundError, BackgroundResult};
use crate::host::{Host, Protocol};
use crate::session::{Session, SessionContext};
use std::collections::HashMap;
use std::sync::Arc;

pub trait SessionFactory: Send + Sync {
    fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>>;
}

#[derive(Clone, Default)]
pub struct ProtocolCatalog {
    factories: HashMap<Protocol, Arc<dyn SessionFactory>>,
}

impl ProtocolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `protocol`, replacing any earlier registration.
    pub fn register(&mut self, protocol: Protocol, factory: Arc<dyn SessionFactory>) {
        if self.factories.insert(protocol, factory).is_some() {
            log::debug!("Replaced session factory for {}", protocol);
        }
    }

    pub fn is_registered(&self, protocol: Protocol) -> bool {
        self.factories.contains_key(&protocol)
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.factories.keys().copied().collect();
        protocols.sort_by_key(|p| p.scheme());
        protocols
    }

    pub fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>> {
        let factory = self.factories.get(&host.protocol).ok_or_else(|| {
            BackgroundError::unsupported(format!("No session factory for {}", host.protocol))
        })?;
        factory.create(host, context)
    }
}
