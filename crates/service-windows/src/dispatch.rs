//! Hosting a [`Program`] under the SCM dispatcher.
//!
//! `StartServiceCtrlDispatcher` calls back into a plain `extern "system"`
//! entry point, so the program is handed over through a process-wide slot
//! that `run` fills on entry and empties before it returns.

use std::ffi::OsString;
use std::sync::{mpsc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState as ScmState,
    ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::{define_windows_service, service_dispatcher};

use service_platform::bridge::{
    ControlBridge, ControlEvent, RunErrors, ServiceState, StatusReport, StatusReporter,
};
use service_platform::{Program, Result, ServiceError};

const PENDING_WAIT_HINT: Duration = Duration::from_secs(10);

struct PendingRun {
    name: String,
    program: Box<dyn Program>,
    errors: RunErrors,
}

static PENDING: Mutex<Option<PendingRun>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

fn pending() -> MutexGuard<'static, Option<PendingRun>> {
    PENDING.lock().unwrap_or_else(|e| e.into_inner())
}

/// Block in the SCM dispatcher until the service stops.
pub fn run(name: &str, program: Box<dyn Program>) -> Result<()> {
    let errors = RunErrors::default();
    *pending() = Some(PendingRun {
        name: name.to_string(),
        program,
        errors: errors.clone(),
    });

    let dispatched = service_dispatcher::start(name, ffi_service_main)
        .map_err(|e| ServiceError::invocation("StartServiceCtrlDispatcher", e));

    if pending().take().is_some() {
        debug!("dispatcher returned before service {} started", name);
    }
    errors.into_result(dispatched)
}

fn service_main(_arguments: Vec<OsString>) {
    let slot = pending().take();
    let Some(PendingRun {
        name,
        mut program,
        errors,
    }) = slot
    else {
        warn!("service entry point called without a pending run");
        return;
    };

    if let Err(e) = host(&name, program.as_mut(), &errors) {
        errors.record(e);
    }
}

fn host(name: &str, program: &mut dyn Program, errors: &RunErrors) -> Result<()> {
    let (tx, mut events) = mpsc::channel();

    let handler = move |control| -> ServiceControlHandlerResult {
        let event = match control {
            ServiceControl::Stop => ControlEvent::Stop,
            ServiceControl::Shutdown => ControlEvent::Shutdown,
            ServiceControl::Interrogate => ControlEvent::Interrogate,
            _ => return ServiceControlHandlerResult::NotImplemented,
        };
        match tx.send(event) {
            Ok(()) => ServiceControlHandlerResult::NoError,
            Err(_) => ServiceControlHandlerResult::NotImplemented,
        }
    };

    let handle = service_control_handler::register(name, handler)
        .map_err(|e| ServiceError::invocation("RegisterServiceCtrlHandlerEx", e))?;

    let mut reporter = ScmReporter {
        handle,
        checkpoint: 0,
    };
    let exit = ControlBridge::new(errors).run(program, &mut events, &mut reporter);
    debug!("service {} exited: {:?}", name, exit);
    Ok(())
}

struct ScmReporter {
    handle: ServiceStatusHandle,
    checkpoint: u32,
}

impl StatusReporter for ScmReporter {
    fn report(&mut self, status: StatusReport) -> Result<()> {
        let (current_state, pending) = match status.state {
            ServiceState::StartPending => (ScmState::StartPending, true),
            ServiceState::Running => (ScmState::Running, false),
            ServiceState::StopPending => (ScmState::StopPending, true),
            ServiceState::Stopped => (ScmState::Stopped, false),
        };
        self.checkpoint = if pending { self.checkpoint + 1 } else { 0 };

        let controls_accepted = if status.accepts_stop {
            ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
        } else {
            ServiceControlAccept::empty()
        };
        let exit_code = match status.exit_code {
            0 => ServiceExitCode::Win32(0),
            code => ServiceExitCode::ServiceSpecific(code),
        };

        self.handle
            .set_service_status(ServiceStatus {
                service_type: ServiceType::OWN_PROCESS,
                current_state,
                controls_accepted,
                exit_code,
                checkpoint: self.checkpoint,
                wait_hint: if pending {
                    PENDING_WAIT_HINT
                } else {
                    Duration::default()
                },
                process_id: None,
            })
            .map_err(|e| ServiceError::invocation("SetServiceStatus", e))
    }
}
