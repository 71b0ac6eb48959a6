use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use time::{Duration, OffsetDateTime};

pub const DEFAULT_MARKER_TTL: Duration = Duration::minutes(5);

/// Advisory "scan in flight" flags keyed by address.
///
/// Kept apart from the host records: a marker never blocks a request and is
/// dropped either when a service report for the address merges or once the
/// TTL has passed.
#[derive(Debug)]
pub struct ScanMarkers {
    ttl: Duration,
    inner: Mutex<HashMap<String, OffsetDateTime>>,
}

impl Default for ScanMarkers {
    fn default() -> Self {
        ScanMarkers::new(DEFAULT_MARKER_TTL)
    }
}

impl ScanMarkers {
    pub fn new(ttl: Duration) -> Self {
        ScanMarkers { ttl, inner: Mutex::new(HashMap::new()) }
    }

    pub fn mark(&self, address: &str, at: OffsetDateTime) {
        self.lock().insert(address.to_string(), at);
    }

    pub fn clear(&self, address: &str) -> bool {
        self.lock().remove(address).is_some()
    }

    pub fn is_scanning(&self, address: &str, now: OffsetDateTime) -> bool {
        let mut map = self.lock();
        match map.get(address) {
            Some(&at) if now - at < self.ttl => true,
            Some(_) => {
                map.remove(address);
                false
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, OffsetDateTime>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
