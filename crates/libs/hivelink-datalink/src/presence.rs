//! Peer presence ("incumbency").
//!
//! Records are upserted on every inbound message and never deleted; a peer is
//! incumbent while its last sighting is within the configured window.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::iface::InterfaceKind;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub last_seen: SystemTime,
    pub intf: InterfaceKind,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub latency: Option<Duration>,
}

/// Link quality reported alongside a sighting, when the transport has it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkQuality {
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub latency: Option<Duration>,
}

#[derive(Debug)]
pub struct PresenceTable {
    window: Duration,
    peers: Mutex<HashMap<String, PresenceRecord>>,
}

impl PresenceTable {
    pub fn new(window: Duration) -> Self {
        Self { window, peers: Mutex::new(HashMap::new()) }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a sighting. A broker sighting never replaces a direct-link
    /// sighting that is still within the window.
    pub fn update(
        &self,
        peer: &str,
        intf: InterfaceKind,
        quality: LinkQuality,
        seen_at: Option<SystemTime>,
    ) {
        let last_seen = seen_at.unwrap_or_else(SystemTime::now);
        let mut peers = self.lock();
        if !intf.is_local() {
            if let Some(existing) = peers.get(peer) {
                if existing.intf.is_local() && self.within_window(existing, last_seen) {
                    return;
                }
            }
        }
        let record = PresenceRecord {
            last_seen,
            intf,
            rssi: quality.rssi,
            snr: quality.snr,
            latency: quality.latency,
        };
        peers.insert(peer.to_string(), record);
    }

    pub fn get(&self, peer: &str) -> Option<PresenceRecord> {
        self.lock().get(peer).cloned()
    }

    pub fn is_incumbent(&self, peer: &str) -> bool {
        self.is_incumbent_at(peer, SystemTime::now())
    }

    pub fn is_incumbent_at(&self, peer: &str, now: SystemTime) -> bool {
        self.lock().get(peer).is_some_and(|record| self.within_window(record, now))
    }

    /// Incumbent, and last heard on a direct link rather than the broker.
    pub fn is_incumbent_local(&self, peer: &str) -> bool {
        self.is_incumbent_local_at(peer, SystemTime::now())
    }

    pub fn is_incumbent_local_at(&self, peer: &str, now: SystemTime) -> bool {
        self.lock()
            .get(peer)
            .is_some_and(|record| record.intf.is_local() && self.within_window(record, now))
    }

    /// Every known peer, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, PresenceRecord)> {
        let mut peers: Vec<_> =
            self.lock().iter().map(|(name, record)| (name.clone(), record.clone())).collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    fn within_window(&self, record: &PresenceRecord, now: SystemTime) -> bool {
        // A sighting stamped in the future counts as just seen.
        now.duration_since(record.last_seen).unwrap_or(Duration::ZERO) <= self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PresenceRecord>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
