//! Deterministic local port allocation
//!
//! The preferred port for a context is `start + (h mod size)` where `h` is
//! the first eight bytes of SHA-256(context) read big-endian. When another
//! context's live tunnel holds that port, ports are probed upward one at a
//! time, wrapping to `start` at the end of the range.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};

/// Half-open range `[start, start + size)` of local ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    size: u16,
}

impl PortRange {
    pub fn new(start: u16, size: u16) -> KubehopResult<Self> {
        let end = start as u32 + size as u32;
        if start == 0 || size == 0 || end > 65536 {
            return Err(KubehopError::InvalidPortRange {
                start: start as u32,
                size: size as u32,
            });
        }
        Ok(Self { start, size })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    /// One past the last port
    pub fn end(&self) -> u32 {
        self.start as u32 + self.size as u32
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && (port as u32) < self.end()
    }

    /// Port the context lands on when nothing collides
    pub fn preferred_port(&self, context: &Context) -> u16 {
        let digest = Sha256::digest(context.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = u64::from_be_bytes(prefix) % self.size as u64;
        self.start + index as u16
    }
}

/// Pick the port for `context`
///
/// `bound` maps ports held by live tunnels to their owning context. A port
/// the context already holds is returned as-is so an existing tunnel keeps
/// its address.
pub fn allocate(
    context: &Context,
    range: &PortRange,
    bound: &HashMap<u16, Context>,
) -> KubehopResult<u16> {
    if let Some((&port, _)) = bound.iter().find(|(_, owner)| *owner == context) {
        return Ok(port);
    }

    let preferred = range.preferred_port(context);
    let offset = preferred - range.start;
    for step in 0..range.size {
        let index = (offset as u32 + step as u32) % range.size as u32;
        let port = range.start + index as u16;
        if !bound.contains_key(&port) {
            return Ok(port);
        }
    }

    Err(KubehopError::PortRangeExhausted {
        start: range.start,
        end: range.end(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(name: &str) -> Context {
        Context::parse(name).unwrap()
    }

    #[test]
    fn range_validation() {
        assert!(PortRange::new(16443, 10000).is_ok());
        assert!(PortRange::new(65535, 1).is_ok());
        assert!(PortRange::new(65535, 2).is_err());
        assert!(PortRange::new(20000, 0).is_err());
        assert!(PortRange::new(0, 10).is_err());
    }

    #[test]
    fn allocation_is_deterministic() {
        let range = PortRange::new(20000, 5000).unwrap();
        let acme = ctx("acme-prod1");
        let first = allocate(&acme, &range, &HashMap::new()).unwrap();
        let second = allocate(&acme, &range, &HashMap::new()).unwrap();

        assert_eq!(first, second);
        assert!((20000..25000).contains(&first));
        assert_eq!(first, range.preferred_port(&acme));
    }

    #[test]
    fn different_ranges_stay_in_bounds() {
        for (start, size) in [(1, 1), (16443, 10000), (60000, 5536)] {
            let range = PortRange::new(start, size).unwrap();
            let port = range.preferred_port(&ctx("acme-prod1"));
            assert!(range.contains(port), "{} not in {:?}", port, range);
        }
    }

    #[test]
    fn collision_with_other_live_tunnel_probes_forward() {
        let range = PortRange::new(30000, 4).unwrap();
        let owner = ctx("acme-prod1");
        let taken = range.preferred_port(&owner);

        // Find a second context that hashes onto the same port
        let rival = (0..1000)
            .map(|i| ctx(&format!("rival-{}", i)))
            .find(|c| range.preferred_port(c) == taken)
            .unwrap();

        let bound = HashMap::from([(taken, owner)]);
        let port = allocate(&rival, &range, &bound).unwrap();

        assert_ne!(port, taken);
        assert!(range.contains(port));
        let expected = 30000 + ((taken - 30000 + 1) % 4);
        assert_eq!(port, expected);
    }

    #[test]
    fn own_live_port_is_reused() {
        let range = PortRange::new(30000, 100).unwrap();
        let acme = ctx("acme-prod1");
        let bound = HashMap::from([(30099, acme.clone())]);

        assert_eq!(allocate(&acme, &range, &bound).unwrap(), 30099);
    }

    #[test]
    fn full_range_is_exhausted() {
        let range = PortRange::new(40000, 3).unwrap();
        let bound: HashMap<u16, Context> = (40000..40003)
            .map(|p| (p, ctx(&format!("other-{}", p))))
            .collect();

        let err = allocate(&ctx("acme-prod1"), &range, &bound).unwrap_err();
        assert!(matches!(
            err,
            KubehopError::PortRangeExhausted {
                start: 40000,
                end: 40003
            }
        ));
    }
}
