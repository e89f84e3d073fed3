//! Port allocation over a fixed window.
//!
//! A port is free when no listener-implying submission holds it in the
//! registry and the host lets us bind it. Allocations are serialised: the
//! returned [`PortLease`] keeps the allocator locked until the caller has
//! committed the port to the registry (or given up), so two pipelines
//! finishing together cannot pick the same port.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AllocationError, HydraResult};
use crate::services::registry::SubmissionRegistry;

/// Answers whether a port can be bound on this host right now.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding and immediately closing a TCP listener.
pub struct BindProbe {
    bind_addr: String,
}

impl BindProbe {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }
}

impl PortProbe for BindProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((self.bind_addr.as_str(), port)).is_ok()
    }
}

/// An allocated port. Holding it blocks other allocations.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    _guard: OwnedMutexGuard<()>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

pub struct PortAllocator {
    base: u16,
    window: u16,
    probe: Arc<dyn PortProbe>,
    lock: Arc<Mutex<()>>,
}

impl PortAllocator {
    pub fn new(base: u16, window: u16, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            base,
            window,
            probe,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Candidate ports in ascending order.
    pub fn candidates(&self) -> impl Iterator<Item = u16> {
        let start = u32::from(self.base);
        (start..start + u32::from(self.window)).filter_map(|p| u16::try_from(p).ok())
    }

    /// Lowest port in the window that is neither assigned nor bound.
    pub async fn allocate(&self, registry: &dyn SubmissionRegistry) -> HydraResult<PortLease> {
        let guard = self.lock.clone().lock_owned().await;
        let held: HashSet<u16> = registry.assigned_ports().await?.into_iter().collect();

        for port in self.candidates() {
            if held.contains(&port) {
                continue;
            }
            if !self.probe.is_free(port) {
                tracing::debug!(port, "Port unassigned but already bound on host");
                continue;
            }
            crate::metrics::port_allocation("allocated");
            tracing::info!(port, held = held.len(), "Allocated port");
            return Ok(PortLease {
                port,
                _guard: guard,
            });
        }

        crate::metrics::port_allocation("exhausted");
        tracing::warn!(
            base = self.base,
            window = self.window,
            held = held.len(),
            "Port window exhausted"
        );
        Err(AllocationError {
            base: self.base,
            window: self.window,
        }
        .into())
    }
}
