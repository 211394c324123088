use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use log::{debug, info};

const BUSY: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
}

#[derive(Debug, Default)]
struct GateInner {
    /// `(epoch << 1) | busy`, so that admission, release and reset are each a
    /// single atomic operation on one word
    state: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
}

/// Lets at most one frame be in flight (inference, decoding, smoothing and
/// labeling) at any time. Frames offered while busy are dropped, not queued.
#[derive(Debug, Clone, Default)]
pub struct InferenceGate {
    inner: Arc<GateInner>,
}

impl InferenceGate {
    pub fn new() -> Self {
        InferenceGate::default()
    }

    pub fn state(&self) -> GateState {
        if self.inner.state.load(Ordering::Acquire) & BUSY == BUSY {
            GateState::Busy
        } else {
            GateState::Idle
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state.load(Ordering::Acquire) >> 1
    }

    /// Idle -> Busy. Returns None (and counts a dropped frame) if already busy.
    pub fn try_admit(&self) -> Option<Admission> {
        let previous = self.inner.state.fetch_or(BUSY, Ordering::AcqRel);
        if previous & BUSY == BUSY {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Gate busy; frame dropped");
            None
        } else {
            self.inner.admitted.fetch_add(1, Ordering::Relaxed);
            Some(Admission {
                gate: self.clone(),
                epoch: previous >> 1,
            })
        }
    }

    /// Force the gate back to Idle and start a new epoch. Whatever is still in
    /// flight belongs to the old epoch: it can no longer release the gate, and
    /// its result should be discarded.
    pub fn reset(&self) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(((word >> 1) + 1) << 1)
            });
        info!("Inference gate reset; now at epoch {}", self.epoch());
    }

    pub fn admitted_count(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn release(&self, epoch: u64) {
        // Only succeeds if no reset happened since admission
        let _ = self.inner.state.compare_exchange(
            (epoch << 1) | BUSY,
            epoch << 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Proof that a frame was admitted. Dropping it returns the gate to Idle,
/// whatever path the processing of that frame took.
#[derive(Debug)]
pub struct Admission {
    gate: InferenceGate,
    epoch: u64,
}

impl Admission {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// False once the gate has been reset after this frame was admitted
    pub fn is_current(&self) -> bool {
        self.gate.epoch() == self.epoch
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.gate.release(self.epoch);
    }
}
