//! Cooperative cancellation for long upscale runs.
//!
//! The engine polls the token between model calls, so a cancelled run stops
//! after the batch in flight rather than mid-inference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, UpscaleError};

/// A cancellation flag shared between the caller and a running engine.
///
/// # Example
///
/// ```
/// use tilescale_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
///
/// handle.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `UpscaleError::Cancelled` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(UpscaleError::Cancelled)
        } else {
            Ok(())
        }
    }
}
