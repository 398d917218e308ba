//! Whole-file replace and remove for system-owned paths.
//!
//! The functions here do the work in-process. [`Privileged`] routes the same
//! operations through the elevation wrapper by re-invoking this binary's
//! hidden `replace-file` / `remove-file` subcommands, so that only those
//! steps run with raised privileges.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::elevation::Elevation;
use crate::error::FsOpError;

/// Exit code of the `replace-file` helper when the target changed underneath us.
pub const EXIT_CONFLICT: i32 = 3;

const NEW_FILE_MODE: u32 = 0o644;

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Copies `staged` over `target` with a same-directory rename.
///
/// With `expect_sha256`, the target is re-hashed right before the rename and
/// left untouched if it no longer matches.
pub fn replace_file(
    staged: &Path,
    target: &Path,
    expect_sha256: Option<&str>,
) -> Result<(), FsOpError> {
    let existing = match fs::read(target) {
        Ok(data) => Some(data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if let Some(expected) = expect_sha256 {
        let actual = existing.as_deref().map(sha256_hex);
        if actual.as_deref() != Some(expected) {
            warn!("{} changed since it was read, refusing to replace", target.display());
            return Err(FsOpError::Conflict(target.to_path_buf()));
        }
    }

    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = NamedTempFile::new_in(dir)?;
    fs::copy(staged, tmp.path())?;
    if !preserve_metadata(target, tmp.path())? {
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(NEW_FILE_MODE))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    info!("Replaced {}", target.display());
    Ok(())
}

/// Gives `replacement` the mode and owner of `target` so a rename does not
/// change either. Returns `false` when `target` does not exist.
pub(crate) fn preserve_metadata(target: &Path, replacement: &Path) -> io::Result<bool> {
    let meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    fs::set_permissions(replacement, fs::Permissions::from_mode(meta.mode()))?;
    if let Err(e) = std::os::unix::fs::chown(replacement, Some(meta.uid()), Some(meta.gid())) {
        warn!("Could not keep owner of {}: {}", target.display(), e);
    }
    Ok(true)
}

/// Removes `target`. Returns `false` when there was nothing to remove.
pub fn remove_file(target: &Path) -> Result<bool, FsOpError> {
    match fs::remove_file(target) {
        Ok(()) => {
            info!("Removed {}", target.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} already absent", target.display());
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// The "run with elevation" capability shared by the apply pipeline and the
/// hooks.
#[derive(Debug, Clone)]
pub struct Privileged {
    elevation: Elevation,
    helper: PathBuf,
}

impl Privileged {
    /// `helper` is the path of this binary, invoked for the file helpers.
    pub fn new(elevation: Elevation, helper: PathBuf) -> Self {
        Privileged { elevation, helper }
    }

    pub fn elevation(&self) -> Elevation {
        self.elevation
    }

    pub fn replace(
        &self,
        staged: &Path,
        target: &Path,
        expect_sha256: Option<&str>,
    ) -> Result<(), FsOpError> {
        if !self.elevation.is_elevated() {
            return replace_file(staged, target, expect_sha256);
        }

        let mut cmd = self.elevation.command(&self.helper);
        cmd.args(["--no-elevate", "replace-file", "--staged"])
            .arg(staged)
            .arg("--target")
            .arg(target);
        if let Some(hash) = expect_sha256 {
            cmd.arg("--expect-sha256").arg(hash);
        }

        let status = cmd.status()?;
        match status.code() {
            Some(0) => Ok(()),
            Some(EXIT_CONFLICT) => Err(FsOpError::Conflict(target.to_path_buf())),
            Some(code) if self.elevation.is_denial(code) => Err(FsOpError::PrivilegeDenied(code)),
            code => Err(FsOpError::Failed { code }),
        }
    }

    pub fn remove(&self, target: &Path) -> Result<(), FsOpError> {
        if !self.elevation.is_elevated() {
            return remove_file(target).map(|_| ());
        }

        let mut cmd = self.elevation.command(&self.helper);
        cmd.args(["--no-elevate", "remove-file"]).arg(target);
        self.check(cmd.status()?.code())
    }

    /// Runs an arbitrary command (`argv[0]` plus arguments) with elevation.
    pub fn run(&self, argv: &[String]) -> Result<(), FsOpError> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };

        let mut cmd = self.elevation.command(program);
        cmd.args(args);
        debug!("Running {:?}", argv);
        self.check(cmd.status()?.code())
    }

    fn check(&self, code: Option<i32>) -> Result<(), FsOpError> {
        match code {
            Some(0) => Ok(()),
            Some(code) if self.elevation.is_denial(code) => Err(FsOpError::PrivilegeDenied(code)),
            code => Err(FsOpError::Failed { code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("staged.conf");
        let target = dir.path().join("target.conf");
        fs::write(&staged, "new\n").unwrap();
        fs::write(&target, "old\n").unwrap();
        (dir, staged, target)
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_replace_file() {
        let (_dir, staged, target) = setup();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o640)).unwrap();

        replace_file(&staged, &target, Some(&sha256_hex(b"old\n"))).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o640);
        assert!(staged.exists());
    }

    #[test]
    fn test_replace_file_conflict_leaves_target() {
        let (_dir, staged, target) = setup();

        let result = replace_file(&staged, &target, Some(&sha256_hex(b"something else")));

        assert!(matches!(result, Err(FsOpError::Conflict(_))));
        assert_eq!(fs::read_to_string(&target).unwrap(), "old\n");
    }

    #[test]
    fn test_replace_file_creates_missing_target() {
        let (dir, staged, _) = setup();
        let target = dir.path().join("fresh.rules");

        replace_file(&staged, &target, None).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn test_remove_file_is_idempotent() {
        let (_dir, _, target) = setup();
        assert!(remove_file(&target).unwrap());
        assert!(!remove_file(&target).unwrap());
    }

    #[test]
    fn test_privileged_without_elevation_runs_in_process() {
        let (_dir, staged, target) = setup();
        let privileged = Privileged::new(Elevation::None, PathBuf::from("/nonexistent"));

        privileged.replace(&staged, &target, None).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
        privileged.remove(&target).unwrap();
        privileged.remove(&target).unwrap();
    }

    #[test]
    fn test_privileged_run() {
        let privileged = Privileged::new(Elevation::None, PathBuf::from("/nonexistent"));
        privileged.run(&["true".to_string()]).unwrap();
        privileged.run(&[]).unwrap();
        assert!(matches!(
            privileged.run(&["false".to_string()]),
            Err(FsOpError::Failed { code: Some(1) })
        ));
    }
}
