//! Makes the active profile take effect: patch a private copy of the
//! undervolt file, swap it into place, then run the apply tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::patcher;
use super::store::ProfileStore;
use crate::error::{ApplyError, ConfigError, PatchError};
use crate::system::fsops::{sha256_hex, Privileged};
use crate::system::process::{run_with_timeout, RunError};

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub profile: usize,
    pub undervolt_path: PathBuf,
    pub exit_code: i32,
}

pub struct ApplyPipeline {
    privileged: Privileged,
    apply_command: Vec<String>,
    timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl ApplyPipeline {
    pub fn new(privileged: Privileged, apply_command: Vec<String>, timeout: Duration) -> Self {
        ApplyPipeline {
            privileged,
            apply_command,
            timeout,
            cancel: None,
        }
    }

    /// Raising `cancel` while the apply tool runs kills it.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs every step once. Nothing is retried; the first failing step ends
    /// the run and is reported through [`ApplyError::stage`].
    pub fn run(&self, store: &ProfileStore) -> Result<ApplyReport, ApplyError> {
        let settings = store.settings();
        if settings.undervolt_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingUndervoltPath.into());
        }
        let target = settings.undervolt_path.as_path();
        let offsets = store.active_profile_offsets();
        info!(
            "Applying profile {} to {}",
            settings.active_profile,
            target.display()
        );

        let original = fs::read_to_string(target).map_err(PatchError::from)?;
        let digest = sha256_hex(original.as_bytes());

        // Private (0700) directory; dropped, with the staged file, on return.
        let staging = tempfile::TempDir::new().map_err(PatchError::from)?;
        let staged = patcher::stage(&original, &offsets, staging.path())?;
        debug!("Patched copy staged at {}", staged.path().display());

        self.privileged.replace(staged.path(), target, Some(&digest))?;

        let exit_code = self.invoke_apply()?;
        info!("Profile {} applied", settings.active_profile);

        Ok(ApplyReport {
            profile: settings.active_profile,
            undervolt_path: target.to_path_buf(),
            exit_code,
        })
    }

    /// Makes `index` the active profile, then runs the pipeline. Used by the
    /// power-event hook.
    pub fn switch_and_apply(
        &self,
        store: &mut ProfileStore,
        index: usize,
    ) -> Result<ApplyReport, ApplyError> {
        store.set_active_profile(index)?;
        self.run(store)
    }

    /// Puts `backup` back in place of the undervolt file and applies it.
    pub fn restore(&self, backup: &Path, target: &Path) -> Result<i32, ApplyError> {
        if !backup.exists() {
            return Err(PatchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no backup at {}", backup.display()),
            ))
            .into());
        }

        self.privileged.replace(backup, target, None)?;
        info!("Restored {} from {}", target.display(), backup.display());
        self.invoke_apply()
    }

    /// Runs the apply tool with elevation and returns its exit code.
    pub fn invoke_apply(&self) -> Result<i32, ApplyError> {
        let Some((program, args)) = self.apply_command.split_first() else {
            return Err(ApplyError::InvokeFailed {
                code: None,
                reason: "apply command is empty".to_string(),
            });
        };

        let elevation = self.privileged.elevation();
        let mut cmd = elevation.command(program);
        cmd.args(args);

        let status = run_with_timeout(&mut cmd, self.timeout, self.cancel.as_deref()).map_err(
            |e| match e {
                RunError::Timeout(after) => ApplyError::Timeout(after),
                RunError::Interrupted => ApplyError::Interrupted,
                other => ApplyError::InvokeFailed {
                    code: None,
                    reason: other.to_string(),
                },
            },
        )?;

        match status.code() {
            Some(0) => Ok(0),
            Some(code) if elevation.is_denial(code) => {
                warn!("Privilege escalation for {} was denied", program);
                Err(ApplyError::InvokeFailed {
                    code: Some(code),
                    reason: "privilege escalation denied".to_string(),
                })
            }
            Some(code) => Err(ApplyError::InvokeFailed {
                code: Some(code),
                reason: format!("{} exited with status {}", program, code),
            }),
            None => Err(ApplyError::InvokeFailed {
                code: None,
                reason: format!("{} was terminated by a signal", program),
            }),
        }
    }
}

/// Copies the undervolt file to `backup` unless a backup already exists.
/// Returns whether a copy was made.
pub fn backup_undervolt_file(source: &Path, backup: &Path) -> std::io::Result<bool> {
    if backup.exists() {
        debug!("Backup {} already present", backup.display());
        return Ok(false);
    }
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, backup)?;
    info!("Backed up {} to {}", source.display(), backup.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::offsets::Offsets;
    use crate::error::ApplyStage;
    use crate::system::elevation::Elevation;
    use tempfile::TempDir;

    const UNDERVOLT: &str = "# test\nundervolt 0 'CPU' 0\nundervolt 1 'GPU' 0\n";

    fn pipeline(command: &[&str]) -> ApplyPipeline {
        ApplyPipeline::new(
            Privileged::new(Elevation::None, PathBuf::from("/nonexistent")),
            command.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    fn setup() -> (TempDir, ProfileStore) {
        let dir = TempDir::new().unwrap();
        let undervolt = dir.path().join("intel-undervolt.conf");
        fs::write(&undervolt, UNDERVOLT).unwrap();
        let mut store =
            ProfileStore::create_default(&dir.path().join("store.conf"), &undervolt).unwrap();
        store
            .change_profile_offsets(
                Some(0),
                Offsets {
                    cpu: -25,
                    gpu: -10,
                    ..Offsets::default()
                },
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_run_success() {
        let (_dir, store) = setup();
        let report = pipeline(&["true"]).run(&store).unwrap();

        assert_eq!(report.profile, 0);
        assert_eq!(report.exit_code, 0);
        assert_eq!(
            fs::read_to_string(&store.settings().undervolt_path).unwrap(),
            "# test\nundervolt 0 'CPU' -25\nundervolt 1 'GPU' -10\n"
        );
    }

    #[test]
    fn test_missing_undervolt_path() {
        let (_dir, mut store) = setup();
        store.change_setting("undervolt_path", "").unwrap();

        let err = pipeline(&["true"]).run(&store).unwrap_err();
        assert!(matches!(err, ApplyError::Config(ConfigError::MissingUndervoltPath)));
        assert_eq!(err.stage(), ApplyStage::Resolve);
    }

    #[test]
    fn test_unreadable_undervolt_file_is_patch_failure() {
        let (dir, mut store) = setup();
        let missing = dir.path().join("missing.conf");
        store
            .change_setting("undervolt_path", &missing.display().to_string())
            .unwrap();

        let err = pipeline(&["true"]).run(&store).unwrap_err();
        assert_eq!(err.stage(), ApplyStage::Patch);
        assert!(!missing.exists());
    }

    #[test]
    fn test_apply_tool_failure_keeps_exit_code() {
        let (_dir, store) = setup();
        let err = pipeline(&["sh", "-c", "exit 4"]).run(&store).unwrap_err();

        assert_eq!(err.stage(), ApplyStage::InvokeApply);
        assert_eq!(err.exit_code(), Some(4));
    }

    #[test]
    fn test_apply_tool_missing() {
        let (_dir, store) = setup();
        let err = pipeline(&["/nonexistent/intel-undervolt", "apply"])
            .run(&store)
            .unwrap_err();
        assert!(matches!(err, ApplyError::InvokeFailed { code: None, .. }));
    }

    #[test]
    fn test_apply_tool_timeout() {
        let (_dir, store) = setup();
        let pipeline = ApplyPipeline::new(
            Privileged::new(Elevation::None, PathBuf::from("/nonexistent")),
            vec!["sleep".to_string(), "5".to_string()],
            Duration::from_millis(200),
        );

        let err = pipeline.run(&store).unwrap_err();
        assert!(matches!(err, ApplyError::Timeout(_)));
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_empty_apply_command() {
        let (_dir, store) = setup();
        let err = pipeline(&[]).run(&store).unwrap_err();
        assert!(matches!(err, ApplyError::InvokeFailed { .. }));
    }

    #[test]
    fn test_switch_and_apply() {
        let (_dir, mut store) = setup();
        store
            .change_profile_offsets(Some(2), Offsets { cpu: -60, ..Offsets::default() })
            .unwrap();

        let report = pipeline(&["true"]).switch_and_apply(&mut store, 2).unwrap();
        assert_eq!(report.profile, 2);
        assert_eq!(store.settings().active_profile, 2);
        assert!(fs::read_to_string(&report.undervolt_path)
            .unwrap()
            .contains("undervolt 0 'CPU' -60"));
    }

    #[test]
    fn test_backup_and_restore() {
        let (dir, store) = setup();
        let target = store.settings().undervolt_path.clone();
        let backup = dir.path().join("backup").join("intel-undervolt.conf.bak");

        assert!(backup_undervolt_file(&target, &backup).unwrap());
        assert!(!backup_undervolt_file(&target, &backup).unwrap());

        pipeline(&["true"]).run(&store).unwrap();
        assert_ne!(fs::read_to_string(&target).unwrap(), UNDERVOLT);

        pipeline(&["true"]).restore(&backup, &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), UNDERVOLT);
    }
}
