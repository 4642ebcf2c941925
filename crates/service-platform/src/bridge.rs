//! Control bridge: maps service-manager control events onto a hosted [`Program`].
//!
//! Every backend drives the same state machine
//! `StartPending -> Running -> StopPending -> Stopped`; only the event source
//! (SCM control handler, POSIX signals) and the status sink differ.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{CallbackPhase, Result, ServiceError};
use crate::service::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Stop,
    Shutdown,
    Interrogate,
    /// Anything the bridge does not act on (raw platform code)
    Other(u32),
}

/// Status as reported back to the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ServiceState,
    /// Whether stop/shutdown controls are accepted in this state
    pub accepts_stop: bool,
    /// 0 on success, otherwise the failing callback's exit code
    pub exit_code: u32,
}

impl StatusReport {
    fn new(state: ServiceState) -> Self {
        Self {
            state,
            accepts_stop: state == ServiceState::Running,
            exit_code: 0,
        }
    }
}

/// How the bridge terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    Stopped,
    StartFailed,
    StopFailed,
}

impl BridgeExit {
    pub fn exit_code(self) -> u32 {
        match self {
            BridgeExit::Stopped => 0,
            BridgeExit::StartFailed => CallbackPhase::Start.exit_code(),
            BridgeExit::StopFailed => CallbackPhase::Stop.exit_code(),
        }
    }
}

pub trait StatusReporter {
    fn report(&mut self, status: StatusReport) -> Result<()>;
}

pub trait ControlEvents {
    /// Block until the next control event. `None` means the source is gone.
    fn next_event(&mut self) -> Option<ControlEvent>;
}

impl ControlEvents for Receiver<ControlEvent> {
    fn next_event(&mut self) -> Option<ControlEvent> {
        self.recv().ok()
    }
}

/// Reporter for backends whose manager does not take status updates.
pub struct LogReporter {
    name: String,
}

impl LogReporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StatusReporter for LogReporter {
    fn report(&mut self, status: StatusReport) -> Result<()> {
        debug!(
            "service {} -> {:?} (exit code {})",
            self.name, status.state, status.exit_code
        );
        Ok(())
    }
}

/// Callback error captured during one run. Shared with the thread the
/// service manager delivers control events on.
#[derive(Clone, Default)]
pub struct RunErrors {
    inner: Arc<Mutex<Option<ServiceError>>>,
}

impl RunErrors {
    pub fn record(&self, err: ServiceError) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(err);
    }

    pub fn take(&self) -> Option<ServiceError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Final result of a run: a recorded callback error wins over the
    /// dispatcher's own outcome.
    pub fn into_result(self, dispatched: Result<()>) -> Result<()> {
        match self.take() {
            Some(err) => Err(err),
            None => dispatched,
        }
    }
}

pub struct ControlBridge {
    errors: RunErrors,
    current: StatusReport,
}

impl ControlBridge {
    pub fn new(errors: &RunErrors) -> Self {
        Self {
            errors: errors.clone(),
            current: StatusReport::new(ServiceState::StartPending),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.current.state
    }

    pub fn run(
        &mut self,
        program: &mut dyn Program,
        events: &mut dyn ControlEvents,
        reporter: &mut dyn StatusReporter,
    ) -> BridgeExit {
        self.transition(reporter, StatusReport::new(ServiceState::StartPending));

        if let Err(e) = program.start() {
            warn!("start callback failed: {:#}", e);
            self.errors.record(ServiceError::callback(CallbackPhase::Start, e));
            return self.finish(reporter, BridgeExit::StartFailed);
        }

        self.transition(reporter, StatusReport::new(ServiceState::Running));
        info!("service running");

        loop {
            let event = match events.next_event() {
                Some(event) => event,
                None => {
                    debug!("control event source closed, treating as shutdown");
                    ControlEvent::Shutdown
                }
            };

            match event {
                ControlEvent::Interrogate => {
                    let current = self.current;
                    self.send(reporter, current);
                }
                ControlEvent::Stop | ControlEvent::Shutdown => {
                    info!("received {:?}, stopping", event);
                    self.transition(reporter, StatusReport::new(ServiceState::StopPending));
                    if let Err(e) = program.stop() {
                        warn!("stop callback failed: {:#}", e);
                        self.errors.record(ServiceError::callback(CallbackPhase::Stop, e));
                        return self.finish(reporter, BridgeExit::StopFailed);
                    }
                    return self.finish(reporter, BridgeExit::Stopped);
                }
                ControlEvent::Other(code) => {
                    debug!("ignoring control event {}", code);
                }
            }
        }
    }

    fn finish(&mut self, reporter: &mut dyn StatusReporter, exit: BridgeExit) -> BridgeExit {
        let mut status = StatusReport::new(ServiceState::Stopped);
        status.exit_code = exit.exit_code();
        self.transition(reporter, status);
        exit
    }

    fn transition(&mut self, reporter: &mut dyn StatusReporter, status: StatusReport) {
        self.current = status;
        self.send(reporter, status);
    }

    fn send(&self, reporter: &mut dyn StatusReporter, status: StatusReport) {
        if let Err(e) = reporter.report(status) {
            warn!("failed to report {:?} to service manager: {}", status.state, e);
        }
    }
}
