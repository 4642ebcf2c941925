//! File-backed descriptor reconciliation (launchd plists, systemd units).
//!
//! New content is staged next to the canonical path, handed to root, then
//! renamed into place so the canonical path never holds a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::invoke::Invoker;

/// Outcome of applying a rendered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Unchanged,
    Created,
    Updated,
}

impl Applied {
    pub fn changed(self) -> bool {
        self != Applied::Unchanged
    }
}

/// `true` when nothing is installed or the installed bytes differ.
pub fn needs_change(installed: Option<&[u8]>, rendered: &[u8]) -> bool {
    installed != Some(rendered)
}

pub struct DescriptorFile {
    path: PathBuf,
}

impl DescriptorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.read_installed()?.is_some())
    }

    /// Current descriptor bytes, or `None` if nothing is installed.
    pub fn read_installed(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::reconcile("read installed descriptor", &self.path, e)),
        }
    }

    /// Put `rendered` in place and let `notify` tell the service manager.
    ///
    /// `notify` receives the previously installed bytes. If it fails, the
    /// previous descriptor is restored (or the new one removed) and
    /// `restore` is called with the same bytes so the manager can pick the
    /// old state back up. The `notify` error is returned either way.
    pub fn apply<F, R>(
        &self,
        rendered: &[u8],
        invoker: &dyn Invoker,
        notify: F,
        restore: R,
    ) -> Result<Applied>
    where
        F: FnOnce(Option<&[u8]>) -> Result<()>,
        R: FnOnce(Option<&[u8]>) -> Result<()>,
    {
        let installed = self.read_installed()?;
        if !needs_change(installed.as_deref(), rendered) {
            debug!("descriptor {} is up to date", self.path.display());
            return Ok(Applied::Unchanged);
        }

        match &installed {
            Some(_) => info!("descriptor {} differs, replacing", self.path.display()),
            None => info!("no descriptor at {}, creating", self.path.display()),
        }

        let staged = self.stage(rendered)?;
        invoker
            .chown_root(staged.path())
            .map_err(|e| ServiceError::reconcile("chown", staged.path(), e))?;
        staged
            .persist(&self.path)
            .map_err(|e| ServiceError::reconcile("rename", &self.path, e.error))?;

        if let Err(e) = notify(installed.as_deref()) {
            if self.roll_back(installed.as_deref(), invoker) {
                if let Err(re) = restore(installed.as_deref()) {
                    warn!("failed to reload previous state for {}: {}", self.path.display(), re);
                }
            }
            return Err(ServiceError::reconcile("load", &self.path, e));
        }

        Ok(if installed.is_some() {
            Applied::Updated
        } else {
            Applied::Created
        })
    }

    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .map_err(|e| ServiceError::reconcile("remove descriptor", &self.path, e))
    }

    fn stage(&self, contents: &[u8]) -> Result<NamedTempFile> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let target = self.path.display();

        std::fs::create_dir_all(dir).map_err(|e| {
            ServiceError::render(&target, format!("cannot create {}: {}", dir.display(), e))
        })?;

        let mut staged = tempfile::Builder::new()
            .prefix(".staged-")
            .tempfile_in(dir)
            .map_err(|e| ServiceError::render(&target, format!("cannot create temp file: {}", e)))?;
        staged
            .write_all(contents)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| ServiceError::render(&target, format!("cannot write temp file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o644))
                .map_err(|e| ServiceError::render(&target, format!("cannot chmod temp file: {}", e)))?;
        }

        Ok(staged)
    }

    fn roll_back(&self, previous: Option<&[u8]>, invoker: &dyn Invoker) -> bool {
        let restored = match previous {
            Some(bytes) => self.stage(bytes).and_then(|staged| {
                invoker
                    .chown_root(staged.path())
                    .map_err(|e| ServiceError::reconcile("chown", staged.path(), e))?;
                staged
                    .persist(&self.path)
                    .map(|_| ())
                    .map_err(|e| ServiceError::reconcile("rename", &self.path, e.error))
            }),
            None => self.remove(),
        };

        match restored {
            Ok(()) => {
                info!("restored previous descriptor at {}", self.path.display());
                true
            }
            Err(e) => {
                warn!("failed to restore descriptor at {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Owner {
        chowned: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    impl Invoker for Owner {
        fn run_privileged(&self, program: &str, _args: &[&str]) -> Result<ExitStatus> {
            Err(ServiceError::invocation(program, "not expected in this test"))
        }

        fn chown_root(&self, path: &Path) -> std::io::Result<()> {
            let contents = std::fs::read(path)?;
            self.chowned.lock().unwrap().push((path.to_path_buf(), contents));
            Ok(())
        }
    }

    #[test]
    fn test_needs_change() {
        assert!(needs_change(None, b"a"));
        assert!(needs_change(Some(b"a"), b"b"));
        assert!(!needs_change(Some(b"a"), b"a"));
    }

    #[test]
    fn test_create_then_unchanged_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.plist"));
        let owner = Owner::default();

        let applied = file.apply(
            b"v1",
            &owner,
            |prev| {
                assert!(prev.is_none());
                Ok(())
            },
            |_| panic!("no rollback expected"),
        );
        assert_eq!(applied.unwrap(), Applied::Created);
        assert_eq!(file.read_installed().unwrap().unwrap(), b"v1");

        let applied = file.apply(b"v1", &owner, |_| panic!("no reload expected"), |_| Ok(()));
        assert_eq!(applied.unwrap(), Applied::Unchanged);

        let applied = file.apply(
            b"v2",
            &owner,
            |prev| {
                assert_eq!(prev, Some(&b"v1"[..]));
                Ok(())
            },
            |_| panic!("no rollback expected"),
        );
        assert_eq!(applied.unwrap(), Applied::Updated);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"v2");
    }

    #[test]
    fn test_ownership_changes_on_finished_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.service"));
        let owner = Owner::default();

        file.apply(b"[Unit]\n", &owner, |_| Ok(()), |_| Ok(())).unwrap();

        let chowned = owner.chowned.lock().unwrap();
        assert_eq!(chowned.len(), 1);
        assert_ne!(chowned[0].0, file.path());
        assert_eq!(chowned[0].1, b"[Unit]\n");
    }

    #[test]
    fn test_failed_load_restores_previous() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.plist"));
        let owner = Owner::default();
        file.apply(b"old", &owner, |_| Ok(()), |_| Ok(())).unwrap();

        let mut restored_with = None;
        let err = file
            .apply(
                b"new",
                &owner,
                |_| Err(ServiceError::invocation("launchctl load", "exit code 5")),
                |prev| {
                    restored_with = prev.map(<[u8]>::to_vec);
                    assert_eq!(std::fs::read(file.path()).unwrap(), b"old");
                    Ok(())
                },
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::Reconcile { op: "load", .. }));
        assert_eq!(std::fs::read(file.path()).unwrap(), b"old");
        assert_eq!(restored_with.as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn test_failed_first_load_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.plist"));

        let mut restore_called = false;
        let result = file.apply(
            b"new",
            &Owner::default(),
            |_| Err(ServiceError::invocation("launchctl load", "exit code 5")),
            |prev| {
                assert!(prev.is_none());
                restore_called = true;
                Ok(())
            },
        );

        assert!(result.is_err());
        assert!(restore_called);
        assert!(!file.exists().unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_chown_keeps_canonical_path_untouched() {
        struct Denied;
        impl Invoker for Denied {
            fn run_privileged(&self, program: &str, _args: &[&str]) -> Result<ExitStatus> {
                Err(ServiceError::invocation(program, "unexpected"))
            }
            fn chown_root(&self, _path: &Path) -> std::io::Result<()> {
                Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.plist"));
        std::fs::write(file.path(), b"old").unwrap();

        let err = file
            .apply(b"new", &Denied, |_| Ok(()), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Reconcile { op: "chown", .. }));
        assert_eq!(std::fs::read(file.path()).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("LaunchAgents").join("demo.plist"));
        let applied = file
            .apply(b"x", &Owner::default(), |_| Ok(()), |_| Ok(()))
            .unwrap();
        assert_eq!(applied, Applied::Created);
    }

    #[test]
    fn test_remove_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = DescriptorFile::new(dir.path().join("demo.plist"));
        assert!(file.remove().is_err());
    }
}
