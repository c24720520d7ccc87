/**
 * engine.rs
 * Port allocation engine
 *
 * Allocation strategy (first success wins):
 * 1. Preferred ports, in configured order
 * 2. Bitmap-guided scan from the rotating cursor
 * 3. Linear pass over the whole range, ignoring bitmap guidance
 *
 * Every candidate goes through `check_and_reserve_port`, which claims the
 * bitmap bit under the state lock before probing and gives it back if the
 * probe says the OS already has the port bound. Two callers of one engine
 * can therefore never be handed the same port, even on a multi-threaded
 * runtime.
 *
 * Claims never expire. A caller that does not call `release_port` keeps its
 * port until the engine is dropped.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AllocatorConfig;
use crate::errors::{AllocError, Result};
use crate::port::bitmap::AllocationBitmap;
use crate::port::cache::{AvailabilityCache, PortInfo};
use crate::port::probe::{PortProbe, TcpProbe};

#[derive(Debug)]
struct EngineState {
    bitmap: AllocationBitmap,
    cache: AvailabilityCache,
}

fn lock_state(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

const PROBE_GATE_STRIPES: usize = 64;

/// Serializes binds on the same port. Allocation probes and health checks
/// both pass through it, so two of our own binds never collide and make a
/// free port look taken. Ports share a stripe by `port % PROBE_GATE_STRIPES`.
struct ProbeGate {
    stripes: Vec<AsyncMutex<()>>,
}

impl ProbeGate {
    fn new() -> Self {
        ProbeGate {
            stripes: (0..PROBE_GATE_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    async fn probe(&self, probe: &dyn PortProbe, port: u16, host: IpAddr) -> bool {
        let _turn = self.stripes[port as usize % PROBE_GATE_STRIPES].lock().await;
        probe.probe(port, host).await
    }
}

/// Bit claimed ahead of a probe. Dropping it while still armed (the
/// allocation future was cancelled mid-probe) gives the bit back.
struct PendingClaim<'a> {
    state: &'a Mutex<EngineState>,
    port: u16,
    armed: bool,
}

impl PendingClaim<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_state(self.state).bitmap.set_bit(self.port, false);
        }
    }
}

/// Dynamic port allocator for one process.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct AllocationEngine {
    config: AllocatorConfig,
    host: IpAddr,
    probe: Arc<dyn PortProbe>,
    gate: Arc<ProbeGate>,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for AllocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationEngine")
            .field("config", &self.config)
            .field("host", &self.host)
            .field("probe", &"<PortProbe>")
            .field("state", &self.state)
            .finish()
    }
}

impl AllocationEngine {
    /// Engine probing with real socket binds
    ///
    /// # Errors
    /// `InvalidConfig` if the config fails validation
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        let probe = Arc::new(TcpProbe::new(config.probe_timeout()));
        Self::with_probe(config, probe)
    }

    /// Engine with an injected probe
    pub fn with_probe(config: AllocatorConfig, probe: Arc<dyn PortProbe>) -> Result<Self> {
        config.validate()?;
        let host = config.host_addr()?;

        let state = EngineState {
            bitmap: AllocationBitmap::new(config.start_port, config.end_port),
            cache: AvailabilityCache::new(config.cache_ttl()),
        };

        debug!(
            start = config.start_port,
            end = config.end_port,
            preferred = ?config.preferred_ports,
            "allocation engine created"
        );

        Ok(AllocationEngine {
            config,
            host,
            probe,
            gate: Arc::new(ProbeGate::new()),
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_state(&self.state)
    }

    /// Allocate one port
    ///
    /// # Errors
    /// `PoolExhausted` naming the range if no port could be claimed
    pub async fn allocate_optimal_port(&self, service_name: Option<&str>) -> Result<u16> {
        self.allocate_within(
            service_name,
            &self.config.preferred_ports,
            self.config.start_port,
            self.config.end_port,
        )
        .await
    }

    /// Three-pass allocation restricted to `[lo, hi]` (a subset of the engine range)
    async fn allocate_within(
        &self,
        service_name: Option<&str>,
        preferred: &[u16],
        lo: u16,
        hi: u16,
    ) -> Result<u16> {
        let in_bounds = |port: u16| port >= lo && port <= hi;

        for &port in preferred.iter().filter(|&&p| in_bounds(p)) {
            if self.check_and_reserve_port(port, service_name).await {
                debug!(port, "allocated preferred port");
                return Ok(port);
            }
        }

        let mut scan = self.lock().bitmap.scan();
        loop {
            let candidate = self.lock().bitmap.next_free(&mut scan);
            let Some(port) = candidate else { break };
            if !in_bounds(port) {
                continue;
            }
            if self.check_and_reserve_port(port, service_name).await {
                self.lock().bitmap.advance_cursor(port);
                return Ok(port);
            }
        }

        debug!(lo, hi, "bitmap scan found nothing, falling back to linear pass");
        for port in lo..=hi {
            if self.check_and_reserve_port(port, service_name).await {
                return Ok(port);
            }
        }

        warn!(start = lo, end = hi, "port pool exhausted");
        Err(AllocError::PoolExhausted { start: lo, end: hi })
    }

    /// Try to claim `port`. Returns true if the caller now owns it.
    ///
    /// Refused without probing if the port is out of range, already claimed,
    /// or freshly cached as unavailable. Otherwise the port is probed and the
    /// result cached whatever it is.
    pub async fn check_and_reserve_port(&self, port: u16, service_name: Option<&str>) -> bool {
        if !self.config.contains(port) {
            return false;
        }

        let claim = {
            let mut state = self.lock();
            if let Some(info) = state.cache.get(port) {
                if !info.available {
                    return false;
                }
            }
            if !state.bitmap.test_and_set(port) {
                return false;
            }
            PendingClaim {
                state: &self.state,
                port,
                armed: true,
            }
        };

        let available = self.gate.probe(self.probe.as_ref(), port, self.host).await;

        {
            let mut state = self.lock();
            let claimed_by = if available {
                service_name.map(str::to_string)
            } else {
                None
            };
            state.cache.set(port, PortInfo::new(port, available, claimed_by));
            if !available {
                state.bitmap.set_bit(port, false);
            }
        }
        claim.disarm();

        if available {
            info!(port, service = service_name.unwrap_or("-"), "claimed port");
        }
        available
    }

    /// Give a port back. Releasing an unclaimed port is a no-op.
    pub fn release_port(&self, port: u16) {
        let mut state = self.lock();
        let was_claimed = state.bitmap.set_bit(port, false);
        state.cache.remove(port);
        if was_claimed {
            info!(port, "released port");
        }
    }

    /// Fresh cache entry for `port`
    pub fn get_port_info(&self, port: u16) -> Option<PortInfo> {
        self.lock().cache.get(port).cloned()
    }

    /// Every cached entry, ascending by port
    pub fn get_all_port_info(&self) -> Vec<PortInfo> {
        self.lock().cache.entries()
    }

    /// Drop stale cache entries. Returns how many were removed.
    pub fn clear_expired_cache(&self) -> usize {
        self.lock().cache.prune_expired()
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.lock().bitmap.is_set(port)
    }

    /// Ports currently claimed, ascending
    pub fn claimed_ports(&self) -> Vec<u16> {
        self.lock().bitmap.set_ports()
    }

    pub fn claimed_count(&self) -> usize {
        self.lock().bitmap.count_set()
    }

    /// Allocate `count` distinct ports, all or nothing.
    ///
    /// Every port in the batch is labelled with `service_name`.
    /// `overrides`, when given, replaces the preferred list for this batch and
    /// narrows candidates to the intersection of its range with the engine's.
    ///
    /// # Errors
    /// - `InvalidConfig` if the override range does not overlap the engine range
    /// - `PartialBatchFailure` if an allocation fails; every port obtained by
    ///   this call has been released by the time it is returned
    pub async fn allocate_multiple_ports(
        &self,
        count: usize,
        service_name: Option<&str>,
        overrides: Option<&AllocatorConfig>,
    ) -> Result<Vec<u16>> {
        let (preferred, lo, hi) = match overrides {
            Some(o) => (
                o.preferred_ports.as_slice(),
                o.start_port.max(self.config.start_port),
                o.end_port.min(self.config.end_port),
            ),
            None => (
                self.config.preferred_ports.as_slice(),
                self.config.start_port,
                self.config.end_port,
            ),
        };

        if lo > hi {
            return Err(AllocError::InvalidConfig(format!(
                "override range does not overlap {}-{}",
                self.config.start_port, self.config.end_port
            )));
        }

        let mut obtained = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_within(service_name, preferred, lo, hi).await {
                Ok(port) => obtained.push(port),
                Err(e) => {
                    warn!(
                        requested = count,
                        obtained = obtained.len(),
                        "batch allocation failed, rolling back"
                    );
                    for &port in &obtained {
                        self.release_port(port);
                    }
                    return Err(AllocError::PartialBatchFailure {
                        requested: count,
                        obtained: obtained.len(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(obtained)
    }

    /// Probe each port directly, ignoring bitmap and cache.
    ///
    /// This is an OS-level snapshot: a port this engine has handed out but
    /// nobody has bound yet reads as bindable. Duplicate ports are checked once.
    pub async fn health_check_ports(&self, ports: &[u16]) -> BTreeMap<u16, bool> {
        let unique: BTreeSet<u16> = ports.iter().copied().collect();

        let handles: Vec<(u16, JoinHandle<bool>)> = unique
            .into_iter()
            .map(|port| {
                let probe = Arc::clone(&self.probe);
                let gate = Arc::clone(&self.gate);
                let host = self.host;
                (
                    port,
                    tokio::spawn(async move { gate.probe(probe.as_ref(), port, host).await }),
                )
            })
            .collect();

        let mut results = BTreeMap::new();
        for (port, handle) in handles {
            let bindable = handle.await.unwrap_or(false);
            results.insert(port, bindable);
        }
        results
    }
}

/// Periodically prune the engine's cache. Abort the handle to stop it.
pub fn spawn_cache_pruner(engine: Arc<AllocationEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = engine.clear_expired_cache();
            if removed > 0 {
                debug!(removed, "pruned expired port cache entries");
            }
        }
    })
}
