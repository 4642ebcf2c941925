//! Signal-driven control events for launchd and systemd, which stop a
//! service by sending SIGTERM.

use nix::sys::signal::{SigSet, Signal};
use tracing::{info, warn};

use crate::bridge::{ControlBridge, ControlEvent, ControlEvents, LogReporter, RunErrors};
use crate::error::{Result, ServiceError};
use crate::service::Program;

/// SIGINT/SIGTERM blocked on the current thread and consumed with `sigwait`.
pub struct SignalEvents {
    set: SigSet,
}

impl SignalEvents {
    /// Must be called before the hosted program spawns threads so they
    /// inherit the mask and the signals are left for `sigwait`.
    pub fn block() -> Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGINT);
        set.add(Signal::SIGTERM);
        set.thread_block()
            .map_err(|e| ServiceError::invocation("pthread_sigmask", e))?;
        Ok(Self { set })
    }
}

impl ControlEvents for SignalEvents {
    fn next_event(&mut self) -> Option<ControlEvent> {
        match self.set.wait() {
            Ok(Signal::SIGINT) => Some(ControlEvent::Stop),
            Ok(Signal::SIGTERM) => Some(ControlEvent::Shutdown),
            Ok(other) => Some(ControlEvent::Other(other as i32 as u32)),
            Err(e) => {
                warn!("sigwait failed: {}", e);
                None
            }
        }
    }
}

impl Drop for SignalEvents {
    fn drop(&mut self) {
        if let Err(e) = self.set.thread_unblock() {
            warn!("failed to unblock signals: {}", e);
        }
    }
}

/// Run `program` until SIGINT or SIGTERM arrives.
pub fn run_until_signalled(name: &str, mut program: Box<dyn Program>) -> Result<()> {
    let errors = RunErrors::default();
    let mut events = SignalEvents::block()?;
    let mut reporter = LogReporter::new(name);

    let exit = ControlBridge::new(&errors).run(program.as_mut(), &mut events, &mut reporter);
    drop(events);
    info!("service {} exited ({:?})", name, exit);

    errors.into_result(Ok(()))
}
