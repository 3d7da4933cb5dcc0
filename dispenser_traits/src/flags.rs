//! Interrupt-to-polling flag handles.
//!
//! Interrupt (or simulated-interrupt) context may only set/increment these;
//! the polling consumer reads and clears. Single producer, single consumer,
//! so no further synchronization is required.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Edge-hit flag. Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct EdgeFlag(Arc<AtomicBool>);

impl EdgeFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Producer side: mark that an edge fired.
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consumer side: take the pending edge, clearing it.
    #[inline]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Non-consuming peek; the consumer normally prefers `take`.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Edge counter with the same producer/consumer discipline.
#[derive(Debug, Clone, Default)]
pub struct EdgeCounter(Arc<AtomicU32>);

impl EdgeCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    /// Producer side.
    #[inline]
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Consumer side: reset at the start of an observation window.
    #[inline]
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_flag() {
        let f = EdgeFlag::new();
        assert!(!f.take());
        f.raise();
        assert!(f.is_raised());
        assert!(f.take());
        assert!(!f.take());
    }

    #[test]
    fn clones_share_state() {
        let f = EdgeFlag::new();
        let producer = f.clone();
        producer.raise();
        assert!(f.take());

        let c = EdgeCounter::new();
        let producer = c.clone();
        producer.increment();
        producer.increment();
        assert_eq!(c.get(), 2);
        c.reset();
        assert_eq!(c.get(), 0);
    }
}
