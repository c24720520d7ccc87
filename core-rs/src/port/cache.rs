//! TTL cache over probe results
//!
//! Expiry is logical: `get` hides stale entries but leaves them in place.
//! `prune_expired` is what physically drops them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Last known state of one port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub port: u16,
    /// Result of the most recent probe
    pub available: bool,
    pub last_checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

impl PortInfo {
    pub fn new(port: u16, available: bool, claimed_by: Option<String>) -> Self {
        PortInfo {
            port,
            available,
            last_checked_at: Utc::now(),
            claimed_by,
        }
    }

    /// Age relative to `now`. A timestamp in the future counts as zero age.
    fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_checked_at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct AvailabilityCache {
    ttl: Duration,
    entries: BTreeMap<u16, PortInfo>,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        AvailabilityCache {
            ttl,
            entries: BTreeMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `port`, if any
    pub fn get(&self, port: u16) -> Option<&PortInfo> {
        self.get_at(port, Utc::now())
    }

    pub fn get_at(&self, port: u16, now: DateTime<Utc>) -> Option<&PortInfo> {
        self.entries
            .get(&port)
            .filter(|info| info.age_at(now) < self.ttl)
    }

    /// Upsert
    pub fn set(&mut self, port: u16, mut info: PortInfo) {
        info.port = port;
        self.entries.insert(port, info);
    }

    pub fn remove(&mut self, port: u16) -> Option<PortInfo> {
        self.entries.remove(&port)
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn prune_expired(&mut self) -> usize {
        self.prune_expired_at(Utc::now())
    }

    pub fn prune_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, info| info.age_at(now) < ttl);
        before - self.entries.len()
    }

    /// Every stored entry (fresh or not), ascending by port
    pub fn entries(&self) -> Vec<PortInfo> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
