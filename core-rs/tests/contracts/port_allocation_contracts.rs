//! Port Allocation Contract Tests
//!
//! These tests pin INVARIANTS that callers (process supervisors) rely on.
//! Each one documents what breaks downstream if it stops holding.
//!
//! OS occupancy is scripted through an injected probe so every scenario is
//! deterministic.

use async_trait::async_trait;
use port_alloc::{AllocError, AllocationEngine, AllocatorConfig, PortProbe};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

struct FixedProbe {
    free: Mutex<HashSet<u16>>,
}

#[async_trait]
impl PortProbe for FixedProbe {
    async fn probe(&self, port: u16, _host: IpAddr) -> bool {
        self.free.lock().unwrap().contains(&port)
    }
}

fn engine_with(config: AllocatorConfig, free: impl IntoIterator<Item = u16>) -> AllocationEngine {
    let probe = Arc::new(FixedProbe {
        free: Mutex::new(free.into_iter().collect()),
    });
    AllocationEngine::with_probe(config, probe).unwrap()
}

/// WHY: Ports outside the configured range may belong to other services
/// REASON: Operators carve out ranges per environment
/// BREAKS: Range isolation between allocator instances
/// SACRIFICES: If this fails, you're handing out ports nobody reserved for you
#[tokio::test]
async fn allocated_ports_stay_in_range() {
    let config = AllocatorConfig {
        preferred_ports: vec![80, 443, 9999],
        ..AllocatorConfig::with_range(3000, 3049)
    };
    let engine = engine_with(config, 0..=u16::MAX);

    for _ in 0..50 {
        let port = engine.allocate_optimal_port(None).await.unwrap();
        assert!((3000..=3049).contains(&port), "port {port} outside range");
    }

    // If this test fails:
    // - Preferred ports outside the range are being honored
    // - Or the bitmap index math is off by one
}

/// WHY: Two services must never be told to bind the same port
/// REASON: The second bind fails and the service crash-loops
/// BREAKS: Supervisor startup of concurrent services
/// SACRIFICES: If this fails, you're reintroducing the check-then-set race
#[tokio::test]
async fn no_duplicate_without_release() {
    let engine = engine_with(AllocatorConfig::with_range(3000, 3099), 3000..=3099);

    let mut seen = HashSet::new();
    for _ in 0..100 {
        let port = engine.allocate_optimal_port(None).await.unwrap();
        assert!(seen.insert(port), "port {port} returned twice");
    }

    assert!(engine.allocate_optimal_port(None).await.is_err());
}

/// WHY: Preferred ports get first refusal
/// REASON: Well-known defaults (e.g. 3000) keep bookmarks and proxies stable
/// BREAKS: Predictable ports for developer tooling
#[tokio::test]
async fn free_preferred_port_wins() {
    let config = AllocatorConfig {
        preferred_ports: vec![3002, 3001],
        ..AllocatorConfig::with_range(3000, 3003)
    };
    let engine = engine_with(config, [3000, 3001, 3003]);

    // 3002 is busy, 3001 is the first free preferred port; 3000 would be
    // the scan's first pick
    assert_eq!(engine.allocate_optimal_port(None).await.unwrap(), 3001);
}

/// WHY: Released ports must return to the pool
/// REASON: Long-running supervisors restart services many times
/// BREAKS: Slow pool leak until exhaustion
#[tokio::test]
async fn release_makes_port_eligible() {
    let engine = engine_with(AllocatorConfig::with_range(3000, 3000), [3000]);

    let port = engine.allocate_optimal_port(None).await.unwrap();
    assert!(engine.allocate_optimal_port(None).await.is_err());

    engine.release_port(port);
    assert!(engine.get_port_info(port).is_none());
    assert_eq!(engine.allocate_optimal_port(None).await.unwrap(), port);
}

/// WHY: Batch allocation is all-or-nothing
/// REASON: A service group needs every port or none of them
/// BREAKS: Half-started service groups holding ports forever
/// SACRIFICES: If this fails, you're leaking claims on partial failure
#[tokio::test]
async fn batch_failure_leaves_no_claims() {
    let engine = engine_with(AllocatorConfig::with_range(3000, 3009), [3002, 3005, 3007]);

    let err = engine.allocate_multiple_ports(5, None, None).await.unwrap_err();
    assert!(matches!(
        err,
        AllocError::PartialBatchFailure { requested: 5, obtained: 3, .. }
    ));

    assert_eq!(engine.claimed_count(), 0);
    for info in engine.get_all_port_info() {
        assert!(info.claimed_by.is_none());
        assert!(!engine.is_claimed(info.port));
    }
}

/// WHY: Health checks report the OS, not the allocator
/// REASON: Monitoring must see a claimed-but-unbound port as bindable
/// BREAKS: Alerting on services that never bound their port
#[tokio::test]
async fn health_check_independent_of_claims() {
    let engine = engine_with(AllocatorConfig::with_range(3000, 3003), [3000, 3001]);

    let a = engine.allocate_optimal_port(None).await.unwrap();
    let b = engine.allocate_optimal_port(None).await.unwrap();

    let health = engine.health_check_ports(&[a, b, 3002]).await;
    assert!(health[&a]);
    assert!(health[&b]);
    assert!(!health[&3002]);
}

/// WHY: Reference scenario from the allocator design
/// REASON: Preferred, then scan, then exhaustion - in that order
#[tokio::test]
async fn preferred_scan_exhaust_scenario() {
    let config = AllocatorConfig {
        preferred_ports: vec![3001],
        ..AllocatorConfig::with_range(3000, 3003)
    };
    let engine = engine_with(config, [3001, 3002]);

    assert_eq!(engine.allocate_optimal_port(None).await.unwrap(), 3001);
    assert_eq!(engine.allocate_optimal_port(None).await.unwrap(), 3002);

    let err = engine.allocate_optimal_port(None).await.unwrap_err();
    assert!(err.is_exhausted());
    assert!(err.to_string().contains("3000-3003"));
}
