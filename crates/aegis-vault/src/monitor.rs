//! Brute-force lockout over authentication attempts.
//!
//! Unlocked --(max_attempts failures inside the reset window)--> Locked
//! Locked --(lockout elapses)--> Unlocked with a fresh counter.
//!
//! State is process-local and deliberately not persisted: a restart clears
//! any lockout.

use std::sync::{Arc, Mutex, MutexGuard};

use aegis_core::{AuthStatus, Result, SecurityEventType, VaultError};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use crate::audit::AuditLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
    /// A gap longer than this between attempts forgets earlier failures.
    pub reset_window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::minutes(15),
            reset_window: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthAttemptState {
    pub failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AuthAttemptState {
    fn status(&self, now: DateTime<Utc>) -> AuthStatus {
        match self.locked_until {
            Some(until) if now < until => AuthStatus {
                locked: true,
                unlock_at: Some(until),
            },
            _ => AuthStatus {
                locked: false,
                unlock_at: None,
            },
        }
    }

    fn expire_lock(&mut self, now: DateTime<Utc>) {
        if self.locked_until.is_some_and(|until| now >= until) {
            self.locked_until = None;
            self.failure_count = 0;
        }
    }
}

enum Transition {
    Succeeded,
    Failed { failure_count: u32 },
    Locked { failure_count: u32, until: DateTime<Utc> },
}

pub struct SecurityMonitor {
    policy: LockoutPolicy,
    state: Mutex<AuthAttemptState>,
    audit: Arc<AuditLog>,
}

impl SecurityMonitor {
    pub fn new(policy: LockoutPolicy, audit: Arc<AuditLog>) -> Self {
        Self {
            policy,
            state: Mutex::new(AuthAttemptState::default()),
            audit,
        }
    }

    pub fn check_status(&self) -> Result<AuthStatus> {
        self.check_status_at(Utc::now())
    }

    pub fn check_status_at(&self, now: DateTime<Utc>) -> Result<AuthStatus> {
        let mut state = self.lock()?;
        state.expire_lock(now);
        Ok(state.status(now))
    }

    /// `LockedOut` with the remaining wait while a lockout is active.
    pub fn ensure_unlocked(&self) -> Result<()> {
        self.ensure_unlocked_at(Utc::now())
    }

    pub fn ensure_unlocked_at(&self, now: DateTime<Utc>) -> Result<()> {
        match self.check_status_at(now)?.unlock_at {
            Some(unlock_at) => Err(VaultError::LockedOut {
                unlock_at,
                remaining_secs: u64::try_from((unlock_at - now).num_seconds()).unwrap_or(0),
            }),
            None => Ok(()),
        }
    }

    pub async fn track_attempt(&self, success: bool) -> Result<AuthStatus> {
        self.track_attempt_at(success, Utc::now()).await
    }

    pub async fn track_attempt_at(&self, success: bool, now: DateTime<Utc>) -> Result<AuthStatus> {
        let (transition, status) = self.apply(success, now)?;
        match transition {
            Transition::Succeeded => {
                self.audit
                    .emit(SecurityEventType::LoginSuccess, json!({}))
                    .await?;
            }
            Transition::Failed { failure_count } => {
                self.audit
                    .emit(
                        SecurityEventType::LoginFailed,
                        json!({ "failureCount": failure_count }),
                    )
                    .await?;
            }
            Transition::Locked {
                failure_count,
                until,
            } => {
                warn!(failure_count, %until, "authentication locked");
                self.audit
                    .emit(
                        SecurityEventType::LoginFailed,
                        json!({ "failureCount": failure_count }),
                    )
                    .await?;
                self.audit
                    .emit(
                        SecurityEventType::AccountLocked,
                        json!({ "failureCount": failure_count, "unlockAt": until }),
                    )
                    .await?;
            }
        }
        Ok(status)
    }

    /// Snapshot of the counters.
    pub fn state(&self) -> Result<AuthAttemptState> {
        Ok(self.lock()?.clone())
    }

    fn apply(&self, success: bool, now: DateTime<Utc>) -> Result<(Transition, AuthStatus)> {
        let mut state = self.lock()?;
        state.expire_lock(now);

        if success {
            *state = AuthAttemptState {
                failure_count: 0,
                last_attempt_at: Some(now),
                locked_until: None,
            };
            return Ok((Transition::Succeeded, state.status(now)));
        }

        if state
            .last_attempt_at
            .is_some_and(|last| now - last > self.policy.reset_window)
        {
            state.failure_count = 0;
        }
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_attempt_at = Some(now);

        let transition =
            if state.locked_until.is_none() && state.failure_count >= self.policy.max_attempts {
                let until = now + self.policy.lockout;
                state.locked_until = Some(until);
                Transition::Locked {
                    failure_count: state.failure_count,
                    until,
                }
            } else {
                Transition::Failed {
                    failure_count: state.failure_count,
                }
            };
        Ok((transition, state.status(now)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, AuthAttemptState>> {
        self.state.lock().map_err(|err| VaultError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}
