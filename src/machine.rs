//! Availability state machine
//!
//! Pure transition logic: the driver feeds in [`Event`]s and executes the
//! returned [`Effect`]s with real (or paused) timers. No clocks or IO here,
//! which keeps every transition testable synchronously.

use crate::classify::ProbeVerdict;
use crate::status::{BackendAvailability, BackendStatus};
use chrono::{DateTime, Utc};

const WAKING_UP_DETAIL: &str = "Backend did not answer in time, it may be waking up";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Mount,
    PeriodicTick,
    ManualRetry,
    WakeupRetryDue,
    ProgressTick,
    ProbeFinished { token: u64, verdict: ProbeVerdict },
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartProbe { token: u64 },
    AbortProbe,
    StartProgressTimer,
    StopProgressTimer,
    ScheduleWakeupRetry,
    CancelWakeupRetry,
    /// Mirror the current status into the process-wide slot
    Publish,
}

#[derive(Debug, Clone)]
pub struct AvailabilityMachine {
    state: BackendAvailability,
    progress_step: u8,
    last_token: u64,
    in_flight: Option<u64>,
    progress_running: bool,
    retry_pending: bool,
    unmounted: bool,
}

impl AvailabilityMachine {
    pub fn new(progress_step: u8) -> Self {
        Self {
            state: BackendAvailability::new(),
            progress_step,
            last_token: 0,
            in_flight: None,
            progress_running: false,
            retry_pending: false,
            unmounted: false,
        }
    }

    pub fn state(&self) -> &BackendAvailability {
        &self.state
    }

    /// Token of the probe whose result will be applied, if one is running.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn progress_running(&self) -> bool {
        self.progress_running
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn is_unmounted(&self) -> bool {
        self.unmounted
    }

    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.unmounted {
            return effects;
        }

        match event {
            Event::Mount | Event::PeriodicTick | Event::ManualRetry => {
                self.begin_probe(&mut effects);
            }
            Event::WakeupRetryDue => {
                self.retry_pending = false;
                self.begin_probe(&mut effects);
            }
            Event::ProgressTick => {
                if !self.state.advance_progress(self.progress_step) && self.progress_running {
                    self.progress_running = false;
                    effects.push(Effect::StopProgressTimer);
                }
            }
            Event::ProbeFinished { token, verdict } => {
                if self.in_flight == Some(token) {
                    self.in_flight = None;
                    self.apply_verdict(verdict, now, &mut effects);
                }
            }
            Event::Unmount => {
                self.unmounted = true;
                if self.in_flight.take().is_some() {
                    effects.push(Effect::AbortProbe);
                }
                self.clear_timers(&mut effects);
            }
        }

        effects
    }

    fn begin_probe(&mut self, effects: &mut Vec<Effect>) {
        if self.in_flight.is_some() {
            return;
        }

        self.clear_timers(effects);

        self.last_token += 1;
        self.in_flight = Some(self.last_token);
        self.state.status = BackendStatus::Checking;
        self.state.detail = None;
        self.state.attempt_count = self.state.attempt_count.saturating_add(1);

        effects.push(Effect::StartProbe {
            token: self.last_token,
        });
        effects.push(Effect::Publish);
    }

    fn apply_verdict(
        &mut self,
        verdict: ProbeVerdict,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        self.state.last_checked_at = Some(now);
        self.state.status = verdict.resulting_status();

        match verdict {
            ProbeVerdict::Online => {
                self.clear_timers(effects);
                self.state.detail = None;
                self.state.attempt_count = 0;
                self.state.wakeup_progress = 0;
            }
            ProbeVerdict::Timeout => {
                self.clear_timers(effects);
                self.state.detail = Some(WAKING_UP_DETAIL.to_string());
                self.state.wakeup_progress = 0;
                self.progress_running = true;
                self.retry_pending = true;
                effects.push(Effect::StartProgressTimer);
                effects.push(Effect::ScheduleWakeupRetry);
            }
            ProbeVerdict::Offline(detail)
            | ProbeVerdict::Error(detail)
            | ProbeVerdict::RateLimited(detail) => {
                self.clear_timers(effects);
                self.state.detail = Some(detail);
            }
        }

        effects.push(Effect::Publish);
    }

    fn clear_timers(&mut self, effects: &mut Vec<Effect>) {
        if self.progress_running {
            self.progress_running = false;
            effects.push(Effect::StopProgressTimer);
        }
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelWakeupRetry);
        }
    }
}
