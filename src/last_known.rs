//! Last-known-value cache for device registers.
//!
//! A [`LastKnown`] remembers the value most recently read from or written to a
//! register, together with whether that value can still be trusted. Values stop
//! being trusted either through [`LastKnown::invalidate`] or by ageing past the
//! freshness window, which guards against a setting that was silently lost on
//! the device never being reapplied.
//!
//! The cache performs no I/O and is not synchronised; it lives inside a
//! controller's locked state.

use std::time::{Duration, Instant};

/// Default freshness window.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_millis(500);

/// Cached register value with validity tracking.
#[derive(Debug, Clone)]
pub struct LastKnown<T> {
    value: Option<T>,
    valid: bool,
    set_at: Instant,
    freshness: Option<Duration>,
}

impl<T: Clone + PartialEq> Default for LastKnown<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> LastKnown<T> {
    /// Creates an unknown value with the default freshness window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_freshness(Some(DEFAULT_FRESHNESS))
    }

    /// Creates an unknown value. `None` means values never expire.
    #[must_use]
    pub fn with_freshness(freshness: Option<Duration>) -> Self {
        Self {
            value: None,
            valid: false,
            set_at: Instant::now(),
            freshness,
        }
    }

    /// Marks the value unknown. The stored value stays available through
    /// [`raw_value`](Self::raw_value).
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether a value is known and still fresh.
    ///
    /// A valid value may become invalid by expiring; an invalid one never
    /// becomes valid on its own.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
            && self
                .freshness
                .is_none_or(|freshness| self.set_at.elapsed() <= freshness)
    }

    /// The value if known and fresh.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        if self.is_valid() { self.value.clone() } else { None }
    }

    /// The value if known, ignoring freshness.
    #[must_use]
    pub fn non_timed_value(&self) -> Option<T> {
        if self.valid { self.value.clone() } else { None }
    }

    /// The stored value whether or not it is valid.
    #[must_use]
    pub fn raw_value(&self) -> Option<T> {
        self.value.clone()
    }

    /// Records a known value, restarting the freshness window. Passing `None`
    /// is equivalent to [`invalidate`](Self::invalidate) after clearing.
    ///
    /// Returns the previously stored value.
    pub fn set_value(&mut self, value: Option<T>) -> Option<T> {
        let prev = core::mem::replace(&mut self.value, value);
        self.valid = self.value.is_some();
        if self.valid {
            self.set_at = Instant::now();
        }
        prev
    }

    /// Whether the value is known, fresh and equal to `value`.
    #[must_use]
    pub fn is_value(&self, value: &T) -> bool {
        self.is_valid() && self.value.as_ref() == Some(value)
    }

    /// Stores `value` unless it is already the known value.
    ///
    /// Returns `true` when the value was updated, i.e. when the caller needs to
    /// write it to the device.
    pub fn update_value(&mut self, value: T) -> bool {
        if self.is_value(&value) {
            false
        } else {
            self.set_value(Some(value));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_starts_unknown() {
        let cache: LastKnown<i8> = LastKnown::new();
        assert!(!cache.is_valid());
        assert_eq!(cache.value(), None);
        assert_eq!(cache.raw_value(), None);
    }

    #[test]
    fn test_update_value_suppresses_repeats() {
        let mut cache = LastKnown::new();
        assert!(cache.update_value(50i8));
        assert!(!cache.update_value(50));
        assert!(!cache.update_value(50));
        assert!(cache.update_value(-20));
        assert_eq!(cache.value(), Some(-20));
    }

    #[test]
    fn test_invalidate_forces_update() {
        let mut cache = LastKnown::new();
        cache.update_value(7i32);
        cache.invalidate();
        assert_eq!(cache.value(), None);
        assert_eq!(cache.non_timed_value(), None);
        assert_eq!(cache.raw_value(), Some(7));
        assert!(cache.update_value(7));
    }

    #[test]
    fn test_set_none_invalidates() {
        let mut cache = LastKnown::new();
        cache.set_value(Some(3u8));
        assert_eq!(cache.set_value(None), Some(3));
        assert!(!cache.is_valid());
    }

    #[test]
    fn test_expiry() {
        let mut cache = LastKnown::with_freshness(Some(Duration::from_millis(5)));
        cache.update_value(1u8);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.value(), None);
        assert_eq!(cache.non_timed_value(), Some(1));
        assert!(cache.update_value(1));
    }

    #[test]
    fn test_no_expiry() {
        let mut cache = LastKnown::with_freshness(None);
        cache.update_value(1u8);
        thread::sleep(Duration::from_millis(5));
        assert!(cache.is_value(&1));
    }
}
