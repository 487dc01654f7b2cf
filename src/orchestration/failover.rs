//! Active-provider selection for interchangeable image services.
//!
//! The policy owns the only piece of settings that changes while a task
//! runs: which image provider is active. Image workers read it at the start
//! of every unit of work and report each attempt back, so a provider switch
//! only ever affects units that have not started yet.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::core::provider::ImageProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    /// Consecutive failures that trigger a switch.
    pub threshold: u32,
    pub auto_failover: bool,
    /// Sleep before retrying the same provider.
    pub retry_delay: Duration,
    /// Sleep once the threshold is reached with auto-failover disabled.
    pub exhausted_delay: Duration,
    /// Provider to come back to after a fallback succeeded.
    pub default_provider: ImageProvider,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            auto_failover: true,
            retry_delay: Duration::from_secs(10),
            exhausted_delay: Duration::from_secs(30),
            default_provider: ImageProvider::Recraft,
        }
    }
}

impl FailoverConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            threshold: settings.image_service_retry_attempts.max(1),
            auto_failover: settings.auto_fallback_image_service,
            retry_delay: settings.retry.failover_delay(),
            exhausted_delay: settings.retry.exhausted_delay(),
            default_provider: settings.default_image_service,
        }
    }

    /// The provider to move to when leaving `from`.
    ///
    /// Recraft and Pollinations swap with each other. Leaving the batch
    /// provider goes to the default, or Recraft when the default is the
    /// batch provider itself.
    pub fn next_provider(&self, from: ImageProvider) -> ImageProvider {
        match from {
            ImageProvider::Recraft => ImageProvider::Pollinations,
            ImageProvider::Pollinations => ImageProvider::Recraft,
            ImageProvider::Googler => match self.default_provider {
                ImageProvider::Pollinations => ImageProvider::Pollinations,
                _ => ImageProvider::Recraft,
            },
        }
    }
}

/// Snapshot of the policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub active: ImageProvider,
    pub consecutive_failures: u32,
    /// Set by a manual switch; keeps the provider from returning to the
    /// default after successes.
    pub manual_override: bool,
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Sleep, then retry the same provider.
    Retry { delay: Duration },
    /// The active provider changed; retry at once with `to`.
    Switched { from: ImageProvider, to: ImageProvider },
    /// Threshold reached without auto-failover; sleep longer and retry.
    ExhaustedBackoff { delay: Duration },
    /// The failed provider was no longer active; retry at once.
    Superseded { active: ImageProvider },
}

/// Provider chosen for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStart {
    pub provider: ImageProvider,
    /// Set when this unit brought the policy back to the default provider;
    /// holds the provider it left.
    pub returned_from: Option<ImageProvider>,
}

#[derive(Debug)]
struct PolicyState {
    service: ServiceState,
    /// A non-default provider succeeded; go back to the default on the next
    /// unit.
    return_to_default: bool,
}

#[derive(Debug)]
pub struct ServiceFailoverPolicy {
    config: FailoverConfig,
    state: Mutex<PolicyState>,
}

impl ServiceFailoverPolicy {
    pub fn new(config: FailoverConfig, initial: ImageProvider) -> Self {
        Self {
            config,
            state: Mutex::new(PolicyState {
                service: ServiceState {
                    active: initial,
                    consecutive_failures: 0,
                    manual_override: false,
                },
                return_to_default: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    pub fn active(&self) -> ImageProvider {
        self.lock().service.active
    }

    pub fn snapshot(&self) -> ServiceState {
        self.lock().service
    }

    /// Provider for the next unit of work.
    ///
    /// This is the only point where a pending return to the default provider
    /// takes effect, so a batch never changes provider halfway. The caller
    /// reports `returned_from` like any other switch.
    pub fn begin_unit(&self) -> UnitStart {
        let mut state = self.lock();
        let mut returned_from = None;
        if state.return_to_default {
            state.return_to_default = false;
            let default = self.config.default_provider;
            if !state.service.manual_override && state.service.active != default {
                info!(
                    from = %state.service.active,
                    to = %default,
                    "returning to default image service"
                );
                returned_from = Some(state.service.active);
                state.service.active = default;
                state.service.consecutive_failures = 0;
            }
        }
        UnitStart {
            provider: state.service.active,
            returned_from,
        }
    }

    pub fn record_success(&self, used: ImageProvider) {
        let mut state = self.lock();
        if used != state.service.active {
            return;
        }
        state.service.consecutive_failures = 0;
        if used != self.config.default_provider {
            state.return_to_default = true;
        }
    }

    pub fn record_failure(&self, used: ImageProvider) -> FailureDecision {
        let mut state = self.lock();
        let active = state.service.active;
        if used != active {
            return FailureDecision::Superseded { active };
        }

        state.service.consecutive_failures += 1;
        let failures = state.service.consecutive_failures;
        if failures < self.config.threshold {
            return FailureDecision::Retry {
                delay: self.config.retry_delay,
            };
        }

        if self.config.auto_failover {
            let to = self.config.next_provider(active);
            warn!(from = %active, to = %to, failures, "switching image service");
            state.service.active = to;
            state.service.consecutive_failures = 0;
            state.service.manual_override = false;
            state.return_to_default = false;
            FailureDecision::Switched { from: active, to }
        } else {
            warn!(provider = %active, failures, "image service keeps failing, backing off");
            FailureDecision::ExhaustedBackoff {
                delay: self.config.exhausted_delay,
            }
        }
    }

    /// Switch provider on user request. Takes effect from the next unit.
    pub fn manual_switch(&self) -> (ImageProvider, ImageProvider) {
        let mut state = self.lock();
        let from = state.service.active;
        let to = self.config.next_provider(from);
        state.service.active = to;
        state.service.consecutive_failures = 0;
        state.service.manual_override = true;
        state.return_to_default = false;
        warn!(from = %from, to = %to, "manual image service override");
        (from, to)
    }
}
