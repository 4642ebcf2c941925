use std::time::Duration;

use crate::error::Result;

/// Pause between the stop and start halves of [`Service::restart`].
pub const RESTART_DELAY: Duration = Duration::from_millis(50);

pub trait Service: Send + Sync {
    /// Name the service is registered under
    fn name(&self) -> &str;

    /// Ask the OS service manager to start the installed service
    fn start(&self) -> Result<()>;

    /// Ask the OS service manager to stop the installed service
    fn stop(&self) -> Result<()>;

    /// Stop, wait briefly, then start. A failed stop skips the start.
    fn restart(&self) -> Result<()> {
        self.stop()?;
        std::thread::sleep(RESTART_DELAY);
        self.start()
    }

    /// Whether the installed registration is missing or differs from the config.
    /// Never modifies persisted state.
    fn install_or_update_required(&self) -> Result<bool>;

    /// Create or update the registration; returns `true` if anything changed
    fn install_or_update(&self) -> Result<bool>;

    /// Remove the registration, failing with `NotInstalled` if there is none
    fn uninstall(&self) -> Result<()>;

    /// Run `program` as the managed service. Blocks until the service manager
    /// (or a termination signal) asks the process to stop.
    fn run(&self, program: Box<dyn Program>) -> Result<()>;
}

/// The hosted program driven by the control bridge.
pub trait Program: Send {
    /// Called once per run, before the service is reported as running
    fn start(&mut self) -> anyhow::Result<()>;

    /// Called at most once per run when the service is asked to stop
    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

type Callback = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// A [`Program`] assembled from closures.
pub struct Callbacks {
    on_start: Callback,
    on_stop: Option<Callback>,
}

impl Callbacks {
    pub fn new<F>(on_start: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            on_start: Box::new(on_start),
            on_stop: None,
        }
    }

    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.on_stop = Some(Box::new(on_stop));
        self
    }
}

impl Program for Callbacks {
    fn start(&mut self) -> anyhow::Result<()> {
        (self.on_start)()
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        match self.on_stop.as_mut() {
            Some(on_stop) => on_stop(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Scripted {
        calls: Arc<Mutex<Vec<&'static str>>>,
        stop_fails: bool,
    }

    impl Service for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn start(&self) -> Result<()> {
            self.calls.lock().unwrap().push("start");
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.calls.lock().unwrap().push("stop");
            if self.stop_fails {
                return Err(ServiceError::invocation("stop scripted", "exit status 3"));
            }
            Ok(())
        }

        fn install_or_update_required(&self) -> Result<bool> {
            Ok(false)
        }

        fn install_or_update(&self) -> Result<bool> {
            Ok(false)
        }

        fn uninstall(&self) -> Result<()> {
            Ok(())
        }

        fn run(&self, _program: Box<dyn Program>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_restart_stops_then_starts() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let svc = Scripted { calls: calls.clone(), stop_fails: false };
        svc.restart().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["stop", "start"]);
    }

    #[test]
    fn test_restart_skips_start_when_stop_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let svc = Scripted { calls: calls.clone(), stop_fails: true };
        assert!(svc.restart().is_err());
        assert_eq!(*calls.lock().unwrap(), vec!["stop"]);
    }

    #[test]
    fn test_callbacks_without_stop_is_noop() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let mut program = Callbacks::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        program.start().unwrap();
        program.stop().unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_stop_error_is_returned() {
        let mut program = Callbacks::new(|| Ok(())).on_stop(|| anyhow::bail!("flush failed"));
        let err = program.stop().unwrap_err();
        assert_eq!(err.to_string(), "flush failed");
    }
}
