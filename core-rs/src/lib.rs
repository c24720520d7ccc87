//! # port-alloc - Dynamic Port Allocator
//!
//! Hands out unique, currently-unbound TCP ports from a bounded range to
//! concurrent callers inside one process.
//!
//! ## Allocation Path
//!
//! ```text
//! allocate_optimal_port
//!   ├─ 1. preferred ports ──┐
//!   ├─ 2. bitmap scan ──────┼─> check_and_reserve_port ─> cache ─> probe (bind + close)
//!   └─ 3. linear fallback ──┘
//! ```
//!
//! ## Guarantees
//!
//! - Within one engine, a port is never handed out twice without a release in between
//! - Batch allocation is all-or-nothing
//! - No coordination with other processes: the live probe is the only defense there

pub mod config;
pub mod errors;
pub mod port;

pub use config::AllocatorConfig;
pub use errors::{AllocError, Result};
pub use port::{
    spawn_cache_pruner, AllocationBitmap, AllocationEngine, AvailabilityCache, PortInfo,
    PortProbe, TcpProbe,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
