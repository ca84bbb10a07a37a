//! Single-flight reload of the active query pipeline.
//!
//! The coordinator owns the one piece of shared mutable state in the bot:
//! the active pipeline and the signature it was built from. Readers take a
//! snapshot (`Arc` clone under a short read lock) and never see a value that
//! is still being built, because a new pipeline is constructed completely
//! before it is swapped in by assignment.
//!
//! # Protocol
//!
//! ```text
//! ensure_latest(force)
//!   ├─ sig = tracker.current_signature()
//!   ├─ !force && pipeline exists && sig <= last_applied ──▶ Unchanged (no lock)
//!   └─ wait for the reload gate (bounded by lock_timeout)
//!        ├─ timed out ──▶ ServingStale(ReloadBusy) or Err(ReloadBusy)
//!        ├─ sig2 = tracker.current_signature()
//!        ├─ !force && pipeline exists && sig2 <= last_applied ──▶ Unchanged
//!        └─ factory.build()
//!             ├─ Ok(p)  ──▶ swap in p, last_applied = sig2 ──▶ Reloaded
//!             └─ Err(e) ──▶ ServingStale(e) if a pipeline exists, else Err(e)
//! ```
//!
//! The gate is held only around build-and-swap. Callers that find the
//! pipeline current never touch it, so they do not queue behind a reload
//! that already finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ReloadError;
use crate::pipeline::PipelineFactory;
use crate::signature::SignatureTracker;

struct Slot<P> {
    pipeline: Option<Arc<P>>,
    last_applied: u64,
}

/// What `ensure_latest` did before handing back a pipeline.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// The active pipeline was already current.
    Unchanged,
    /// A new pipeline was built and installed.
    Reloaded { signature: u64 },
    /// A reload was needed but failed; the previous pipeline is still active.
    ServingStale { error: ReloadError },
}

/// A pipeline snapshot plus how it was obtained.
pub struct Ensured<P> {
    pub pipeline: Arc<P>,
    pub outcome: ReloadOutcome,
}

/// Read-only view for the diagnostics command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub current_signature: u64,
    pub last_applied_signature: u64,
    pub pipeline_ready: bool,
    pub reloads: u64,
}

pub struct ReloadCoordinator<P> {
    tracker: SignatureTracker,
    factory: Arc<dyn PipelineFactory<P>>,
    slot: RwLock<Slot<P>>,
    gate: tokio::sync::Mutex<()>,
    lock_timeout: Duration,
    reloads: AtomicU64,
}

impl<P: Send + Sync + 'static> ReloadCoordinator<P> {
    pub fn new(
        tracker: SignatureTracker,
        factory: Arc<dyn PipelineFactory<P>>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            factory,
            slot: RwLock::new(Slot {
                pipeline: None,
                last_applied: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
            lock_timeout,
            reloads: AtomicU64::new(0),
        }
    }

    /// The active pipeline, without any freshness check.
    pub fn current(&self) -> Option<Arc<P>> {
        self.read_slot().pipeline.clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let current_signature = self.tracker.current_signature();
        let slot = self.read_slot();
        Diagnostics {
            current_signature,
            last_applied_signature: slot.last_applied,
            pipeline_ready: slot.pipeline.is_some(),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    pub fn tracker(&self) -> &SignatureTracker {
        &self.tracker
    }

    /// Make sure the active pipeline reflects the on-disk dataset.
    ///
    /// With `force`, a rebuild happens even when the signature has not
    /// moved. Errors are returned only when there is no pipeline at all to
    /// fall back on.
    pub async fn ensure_latest(&self, force: bool) -> Result<Ensured<P>, ReloadError> {
        let sig = self.tracker.current_signature();
        if !force {
            if let Some(pipeline) = self.current_if_fresh(sig) {
                return Ok(Ensured {
                    pipeline,
                    outcome: ReloadOutcome::Unchanged,
                });
            }
        }

        let started = Instant::now();
        let _gate = match tokio::time::timeout(self.lock_timeout, self.gate.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                let error = ReloadError::ReloadBusy {
                    waited: started.elapsed(),
                };
                return self.fall_back(error);
            }
        };

        // Another caller may have finished the same reload while we waited
        let sig2 = self.tracker.current_signature();
        if !force {
            if let Some(pipeline) = self.current_if_fresh(sig2) {
                tracing::debug!(signature = sig2, "reload already applied by another caller");
                return Ok(Ensured {
                    pipeline,
                    outcome: ReloadOutcome::Unchanged,
                });
            }
        }

        tracing::info!(signature = sig2, force, "reloading query pipeline");
        match self.factory.build().await {
            Ok(pipeline) => {
                let pipeline = Arc::new(pipeline);
                {
                    let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
                    slot.pipeline = Some(pipeline.clone());
                    slot.last_applied = sig2;
                }
                self.reloads.fetch_add(1, Ordering::Relaxed);
                tracing::info!(signature = sig2, "reload ok");
                Ok(Ensured {
                    pipeline,
                    outcome: ReloadOutcome::Reloaded { signature: sig2 },
                })
            }
            Err(error) => self.fall_back(error),
        }
    }

    fn current_if_fresh(&self, sig: u64) -> Option<Arc<P>> {
        let slot = self.read_slot();
        match &slot.pipeline {
            Some(p) if sig <= slot.last_applied => Some(p.clone()),
            _ => None,
        }
    }

    fn fall_back(&self, error: ReloadError) -> Result<Ensured<P>, ReloadError> {
        match self.current() {
            Some(pipeline) => {
                tracing::warn!(error = %error, "reload failed, serving previous pipeline");
                Ok(Ensured {
                    pipeline,
                    outcome: ReloadOutcome::ServingStale { error },
                })
            }
            None => {
                tracing::error!(error = %error, "reload failed and no pipeline is loaded");
                Err(error)
            }
        }
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot<P>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }
}
