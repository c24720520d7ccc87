/**
 * port module
 * Dynamic port allocation: live probe, TTL cache, claim bitmap, engine
 */

pub mod bitmap;
pub mod cache;
pub mod engine;
pub mod probe;

pub use bitmap::AllocationBitmap;
pub use cache::{AvailabilityCache, PortInfo};
pub use engine::{spawn_cache_pruner, AllocationEngine};
pub use probe::{PortProbe, TcpProbe, LOOPBACK};
