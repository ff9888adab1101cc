//! Port allocation shared by every ensemble of a batch.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::{ClusterError, Result};

/// Default first port handed out.
pub const DEFAULT_BASE_PORT: u16 = 11221;

/// Monotonic port counter.
///
/// One allocator is shared (through `Arc`) by all ensembles running in a
/// batch so that concurrently running ensembles never collide. [`reset`]
/// rewinds it between independent batches.
///
/// [`reset`]: PortAllocator::reset
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    next: AtomicU32,
}

impl PortAllocator {
    /// Creates an allocator starting at `base`.
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: AtomicU32::new(u32::from(base)),
        }
    }

    /// Returns the next unused port.
    pub fn next_port(&self) -> Result<u16> {
        let port = self.next.fetch_add(1, Ordering::Relaxed);
        u16::try_from(port).map_err(|_| ClusterError::PortsExhausted(u16::MAX))
    }

    /// Rewinds to the base port.
    pub fn reset(&self) {
        self.next.store(u32::from(self.base), Ordering::Relaxed);
    }

    /// Returns the base port.
    pub fn base(&self) -> u16 {
        self.base
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sequential_ports_and_reset() {
        let ports = PortAllocator::new(20000);
        assert_eq!(ports.next_port().unwrap(), 20000);
        assert_eq!(ports.next_port().unwrap(), 20001);

        ports.reset();
        assert_eq!(ports.next_port().unwrap(), 20000);
    }

    #[test]
    fn test_exhaustion() {
        let ports = PortAllocator::new(u16::MAX);
        assert_eq!(ports.next_port().unwrap(), u16::MAX);
        assert!(matches!(
            ports.next_port(),
            Err(ClusterError::PortsExhausted(_))
        ));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ports = Arc::new(PortAllocator::new(30000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ports = Arc::clone(&ports);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| ports.next_port().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for port in handle.join().unwrap() {
                assert!(seen.insert(port));
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
