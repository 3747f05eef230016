use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why an operation stopped before committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Canceled,
    DeadlineExceeded,
}

/// Caller-supplied cancellation and deadline, passed through every operation.
///
/// Clones share the cancel flag, so a caller can keep one handle and cancel
/// work running on another thread.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            canceled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Errors once the context is canceled or past its deadline.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.is_canceled() {
            return Err(Interrupt::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
