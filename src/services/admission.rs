//! Admission guards
//!
//! Consulted right before a new signing request is created. A guard that
//! halts turns the pass into a reported no-op.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

/// Decides whether request creation must stop
pub trait AdmissionGuard: Send + Sync {
    fn should_halt(&self) -> bool;
}

impl<F> AdmissionGuard for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_halt(&self) -> bool {
        self()
    }
}

/// Admits every request
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverHalt;

impl AdmissionGuard for NeverHalt {
    fn should_halt(&self) -> bool {
        false
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Caps request creation per hour across every identity sharing the guard
#[derive(Clone)]
pub struct RateLimitedAdmission {
    limiter: Arc<DirectRateLimiter>,
    per_hour: u32,
}

impl RateLimitedAdmission {
    /// `None` when `per_hour` is zero
    pub fn per_hour(per_hour: u32) -> Option<Self> {
        let quota = Quota::per_hour(NonZeroU32::new(per_hour)?);
        Some(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            per_hour,
        })
    }
}

impl std::fmt::Debug for RateLimitedAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedAdmission")
            .field("per_hour", &self.per_hour)
            .finish()
    }
}

impl AdmissionGuard for RateLimitedAdmission {
    fn should_halt(&self) -> bool {
        match self.limiter.check() {
            Ok(()) => false,
            Err(_) => {
                warn!(
                    "Certificate request quota of {} per hour exhausted",
                    self.per_hour
                );
                true
            }
        }
    }
}
