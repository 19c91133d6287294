//! Cache Entry Types
//!
//! Entries held by the local tier. The value is kept in its encoded form so a
//! local hit and a distributed hit decode through the same path.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// Local-tier entry with the two timestamps that drive expiry
#[derive(Clone)]
pub struct LocalEntry {
    /// Encoded value (zero-copy clone on hit)
    value: Bytes,
    /// When the entry was written
    inserted_at: Instant,
    /// When the entry was last read or written
    last_access: Instant,
}

impl LocalEntry {
    /// Create an entry written at `now`
    pub fn new(value: Bytes, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            last_access: now,
        }
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    #[inline]
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Record a read at `now`
    #[inline]
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_access {
            self.last_access = now;
        }
    }

    /// Time since the entry was written
    #[inline]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    /// Time since the entry was last read
    #[inline]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }

    /// Whichever of the two expiry rules fires first evicts the entry
    #[inline]
    pub fn is_expired(&self, now: Instant, after_write: Duration, after_access: Duration) -> bool {
        self.age(now) > after_write || self.idle(now) > after_access
    }

    /// Encoded size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

impl std::fmt::Debug for LocalEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEntry")
            .field("size", &self.value.len())
            .field("inserted_at", &self.inserted_at)
            .field("last_access", &self.last_access)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const WRITE: Duration = Duration::from_secs(1800);
    const ACCESS: Duration = Duration::from_secs(600);

    #[test]
    fn test_entry_creation() {
        let now = Instant::now();
        let entry = LocalEntry::new(Bytes::from_static(b"\"alice\""), now);

        assert_eq!(entry.size(), 7);
        assert_eq!(entry.inserted_at(), now);
        assert_eq!(entry.last_access(), now);
        assert!(!entry.is_expired(now, WRITE, ACCESS));
    }

    #[test]
    fn test_expire_after_access() {
        let now = Instant::now();
        let entry = LocalEntry::new(Bytes::from_static(b"1"), now);

        assert!(!entry.is_expired(now + ACCESS, WRITE, ACCESS));
        assert!(entry.is_expired(now + ACCESS + Duration::from_secs(1), WRITE, ACCESS));
    }

    #[test]
    fn test_touch_extends_idle_but_not_age() {
        let now = Instant::now();
        let mut entry = LocalEntry::new(Bytes::from_static(b"1"), now);

        // Read every 5 minutes: access expiry never fires
        let mut t = now;
        for _ in 0..6 {
            t += Duration::from_secs(300);
            assert!(!entry.is_expired(t, WRITE, ACCESS));
            entry.touch(t);
        }
        assert_eq!(entry.age(t), Duration::from_secs(1800));

        // Write expiry still fires
        t += Duration::from_secs(1);
        assert!(entry.is_expired(t, WRITE, ACCESS));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let now = Instant::now();
        let mut entry = LocalEntry::new(Bytes::from_static(b"1"), now + Duration::from_secs(10));
        entry.touch(now);
        assert_eq!(entry.last_access(), now + Duration::from_secs(10));
    }

    #[test]
    fn test_entry_debug() {
        let entry = LocalEntry::new(Bytes::from_static(b"Test"), Instant::now());
        let debug = format!("{:?}", entry);
        assert!(debug.contains("LocalEntry"));
        assert!(debug.contains("size"));
    }
}
