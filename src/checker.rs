//! Backend status checker: drives the availability state machine on tokio
//! timers and mirrors every transition into the status mirror.

use crate::classify::{classify, ProbeError, ProbeVerdict};
use crate::config::Config;
use crate::errors::{MonitorError, Result};
use crate::machine::{AvailabilityMachine, Effect, Event};
use crate::mirror::{MirrorWriter, StatusMirror};
use crate::status::{BackendAvailability, BackendStatus};
use crate::transport::HealthProbe;

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::future::pending;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
enum Command {
    Retry,
    Unmount,
}

/// Handle to a mounted prober.
///
/// Mounting spawns a driver task that probes immediately and then every
/// `poll_interval`. Dropping the handle without [`unmount`](Self::unmount)
/// aborts that task.
pub struct BackendStatusChecker {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<BackendAvailability>,
    display_cap: u8,
    task: Option<JoinHandle<()>>,
}

impl BackendStatusChecker {
    /// Mount a checker. Must be called from within a tokio runtime.
    pub fn mount(
        config: &Config,
        probe: Arc<dyn HealthProbe>,
        mirror: &StatusMirror,
    ) -> Result<Self> {
        config.validate().map_err(MonitorError::Config)?;
        let writer = mirror.attach()?;

        info!("Mounting backend status checker for {}", probe.target());

        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(BackendAvailability::new());
        let (result_tx, result_rx) = mpsc::channel(4);

        let driver = Driver {
            config: config.clone(),
            probe,
            machine: AvailabilityMachine::new(config.progress_step),
            writer,
            state_tx,
            commands: command_rx,
            results_tx: result_tx,
            results_rx: result_rx,
            timers: Timers::new(config),
            in_flight: None,
        };

        Ok(Self {
            commands: command_tx,
            state: state_rx,
            display_cap: config.progress_display_cap,
            task: Some(tokio::spawn(driver.run())),
        })
    }

    /// Force an immediate re-check. No-op while a probe is already running.
    pub async fn retry(&self) -> Result<()> {
        self.commands
            .send(Command::Retry)
            .await
            .map_err(|_| MonitorError::Other("status checker is no longer running".to_string()))
    }

    pub fn current(&self) -> BackendAvailability {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> BackendStatus {
        self.state.borrow().status
    }

    /// Wake-up progress as the banner should render it
    pub fn display_progress(&self) -> u8 {
        self.state.borrow().display_progress(self.display_cap)
    }

    pub fn subscribe(&self) -> watch::Receiver<BackendAvailability> {
        self.state.clone()
    }

    /// Stop polling and release the status mirror. Once this returns no
    /// timer fires and the state no longer changes.
    pub async fn unmount(mut self) {
        let _ = self.commands.send(Command::Unmount).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Status checker task ended abnormally: {}", e);
            }
        }
        info!("Backend status checker unmounted");
    }
}

impl Drop for BackendStatusChecker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Timers owned by the driver. Each slot holds at most one timer.
struct Timers {
    poll: Interval,
    progress: Option<Interval>,
    wakeup_retry: Option<Pin<Box<Sleep>>>,
}

impl Timers {
    fn new(config: &Config) -> Self {
        let mut poll = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            poll,
            progress: None,
            wakeup_retry: None,
        }
    }
}

/// Aborts the probe task when dropped.
struct ProbeTask(JoinHandle<()>);

impl Drop for ProbeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Driver {
    config: Config,
    probe: Arc<dyn HealthProbe>,
    machine: AvailabilityMachine,
    writer: MirrorWriter,
    state_tx: watch::Sender<BackendAvailability>,
    commands: mpsc::Receiver<Command>,
    results_tx: mpsc::Sender<(u64, ProbeVerdict)>,
    results_rx: mpsc::Receiver<(u64, ProbeVerdict)>,
    timers: Timers,
    in_flight: Option<ProbeTask>,
}

impl Driver {
    #[instrument(skip(self))]
    async fn run(mut self) {
        self.dispatch(Event::Mount);

        loop {
            let event = tokio::select! {
                _ = self.timers.poll.tick() => Event::PeriodicTick,
                command = self.commands.recv() => match command {
                    Some(Command::Retry) => Event::ManualRetry,
                    Some(Command::Unmount) | None => Event::Unmount,
                },
                Some((token, verdict)) = self.results_rx.recv() => {
                    Event::ProbeFinished { token, verdict }
                }
                _ = next_tick(&mut self.timers.progress) => Event::ProgressTick,
                _ = deadline(&mut self.timers.wakeup_retry) => Event::WakeupRetryDue,
            };

            let unmounting = event == Event::Unmount;
            self.dispatch(event);

            if unmounting {
                break;
            }
        }

        debug!("Status checker driver stopped");
    }

    fn dispatch(&mut self, event: Event) {
        let before = self.machine.state().status;
        let effects = self.machine.handle(event, Utc::now());

        for effect in effects {
            self.execute(effect);
        }

        let state = self.machine.state().clone();
        if state.status != before {
            info!(
                "Backend status changed: {} -> {} (attempt {})",
                before, state.status, state.attempt_count
            );
        }

        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartProbe { token } => self.start_probe(token),
            Effect::AbortProbe => {
                if self.in_flight.take().is_some() {
                    debug!("Aborted in-flight health probe");
                }
            }
            Effect::StartProgressTimer => {
                let tick = self.config.progress_tick;
                self.timers.progress = Some(interval_at(Instant::now() + tick, tick));
            }
            Effect::StopProgressTimer => {
                self.timers.progress = None;
            }
            Effect::ScheduleWakeupRetry => {
                debug!(
                    "Scheduling wake-up re-check in {}s",
                    self.config.wakeup_retry_delay.as_secs()
                );
                self.timers.wakeup_retry = Some(Box::pin(sleep(self.config.wakeup_retry_delay)));
            }
            Effect::CancelWakeupRetry => {
                self.timers.wakeup_retry = None;
            }
            Effect::Publish => {
                let state = self.machine.state();
                if let Some(detail) = &state.detail {
                    if state.status != BackendStatus::WakingUp {
                        warn!("Backend {}: {}", state.status, detail);
                    }
                }
                self.writer.publish(state.snapshot());
            }
        }
    }

    fn start_probe(&mut self, token: u64) {
        let probe = Arc::clone(&self.probe);
        let results = self.results_tx.clone();
        let budget = self.config.probe_timeout;

        debug!("Starting health probe {} against {}", token, probe.target());

        let handle = tokio::spawn(async move {
            let guarded = AssertUnwindSafe(timeout(budget, probe.probe())).catch_unwind();
            let verdict = match guarded.await {
                Ok(Ok(outcome)) => classify(&outcome),
                Ok(Err(_elapsed)) => classify(&Err(ProbeError::Timeout)),
                Err(panic) => ProbeVerdict::Error(panic_message(panic.as_ref())),
            };
            let _ = results.send((token, verdict)).await;
        });

        self.in_flight = Some(ProbeTask(handle));
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn deadline(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "health probe panicked".to_string()
    }
}
