//! Error types shared by the store, the patcher, the apply pipeline and the hooks.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading, mutating or persisting the profile store.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("profile store not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("profile store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("{key} points at profile {index}, but only {count} profiles exist")]
    InvalidReference {
        key: String,
        index: String,
        count: usize,
    },

    #[error("profile {0} does not exist")]
    ProfileNotFound(usize),

    #[error("unknown setting: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for setting {key}")]
    InvalidValue { key: String, value: String },

    #[error("undervolt file path is not set")]
    MissingUndervoltPath,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while rewriting the undervolt file.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("line {line}: unknown undervolt component index {index:?}")]
    UnknownComponent { line: usize, index: String },

    #[error("line {line}: undervolt declaration has no value token")]
    Malformed { line: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the replace/remove file operations, elevated or not.
#[derive(Error, Debug)]
pub enum FsOpError {
    #[error("{} changed since it was read", .0.display())]
    Conflict(PathBuf),

    #[error("privilege escalation was denied (exit code {0})")]
    PrivilegeDenied(i32),

    #[error("privileged helper failed (exit code {code:?})")]
    Failed { code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The step of the apply pipeline a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Resolve,
    Patch,
    Move,
    InvokeApply,
}

impl ApplyStage {
    pub fn label(&self) -> &'static str {
        match self {
            ApplyStage::Resolve => "resolve",
            ApplyStage::Patch => "patch",
            ApplyStage::Move => "move",
            ApplyStage::InvokeApply => "invoke-apply",
        }
    }
}

/// Errors raised by the apply pipeline.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("patching the undervolt file failed: {0}")]
    PatchFailed(#[from] PatchError),

    #[error("moving the patched undervolt file into place failed: {0}")]
    MoveFailed(String),

    #[error("privilege escalation was denied (exit code {0})")]
    PrivilegeDenied(i32),

    #[error("{} was modified by another process; nothing was replaced", .0.display())]
    Conflict(PathBuf),

    #[error("apply command failed (exit code {code:?}): {reason}")]
    InvokeFailed { code: Option<i32>, reason: String },

    #[error("apply command did not finish within {0:?}")]
    Timeout(Duration),

    #[error("apply command was interrupted")]
    Interrupted,
}

impl ApplyError {
    pub fn stage(&self) -> ApplyStage {
        match self {
            ApplyError::Config(_) => ApplyStage::Resolve,
            ApplyError::PatchFailed(_) => ApplyStage::Patch,
            ApplyError::MoveFailed(_) | ApplyError::PrivilegeDenied(_) | ApplyError::Conflict(_) => {
                ApplyStage::Move
            }
            ApplyError::InvokeFailed { .. } | ApplyError::Timeout(_) | ApplyError::Interrupted => {
                ApplyStage::InvokeApply
            }
        }
    }

    /// Exit code reported by the external process, when there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ApplyError::PrivilegeDenied(code) => Some(*code),
            ApplyError::InvokeFailed { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<FsOpError> for ApplyError {
    fn from(e: FsOpError) -> Self {
        match e {
            FsOpError::Conflict(path) => ApplyError::Conflict(path),
            FsOpError::PrivilegeDenied(code) => ApplyError::PrivilegeDenied(code),
            other => ApplyError::MoveFailed(other.to_string()),
        }
    }
}

/// Step of a hook installation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Stage,
    Move,
    Reload,
    Verify,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookStage::Stage => "stage",
            HookStage::Move => "move",
            HookStage::Reload => "reload",
            HookStage::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Errors raised while installing or removing the power/startup hooks.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook installation failed at {stage}: {reason}")]
    InstallFailed { stage: HookStage, reason: String },

    #[error("hook removal failed: {reason}")]
    RemoveFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_stage() {
        let e = ApplyError::Config(ConfigError::MissingUndervoltPath);
        assert_eq!(e.stage(), ApplyStage::Resolve);
        let e = ApplyError::PatchFailed(PatchError::Malformed { line: 3 });
        assert_eq!(e.stage(), ApplyStage::Patch);
        assert_eq!(ApplyError::Conflict(PathBuf::from("/x")).stage(), ApplyStage::Move);
        assert_eq!(ApplyError::Interrupted.stage(), ApplyStage::InvokeApply);
        assert_eq!(ApplyStage::InvokeApply.label(), "invoke-apply");
    }

    #[test]
    fn test_apply_error_exit_code() {
        let e = ApplyError::InvokeFailed {
            code: Some(2),
            reason: "exited".into(),
        };
        assert_eq!(e.exit_code(), Some(2));
        assert_eq!(ApplyError::PrivilegeDenied(126).exit_code(), Some(126));
        assert_eq!(ApplyError::Timeout(Duration::from_secs(1)).exit_code(), None);
    }

    #[test]
    fn test_fsop_error_maps_to_move_stage() {
        let e: ApplyError = FsOpError::Failed { code: Some(1) }.into();
        assert_eq!(e.stage(), ApplyStage::Move);
        let e: ApplyError = FsOpError::PrivilegeDenied(127).into();
        assert!(matches!(e, ApplyError::PrivilegeDenied(127)));
    }
}
