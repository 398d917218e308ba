use std::ffi::OsStr;
use std::process::Command;

use log::debug;
use serde::Deserialize;

/// How steps that touch system-owned paths are run.
///
/// Only the single command handed to [`Elevation::command`] runs with raised
/// privileges; the calling process keeps its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    Pkexec,
    Sudo,
    /// Already privileged (systemd units) or testing against user-owned paths.
    None,
}

impl Elevation {
    /// Builds a command for `program`, prefixed with the elevation wrapper.
    /// Arguments are passed as a list and never go through a shell.
    pub fn command<S: AsRef<OsStr>>(&self, program: S) -> Command {
        let program = program.as_ref();
        let cmd = match self {
            Elevation::Pkexec => {
                let mut cmd = Command::new("pkexec");
                cmd.arg(program);
                cmd
            }
            Elevation::Sudo => {
                let mut cmd = Command::new("sudo");
                cmd.arg("--").arg(program);
                cmd
            }
            Elevation::None => Command::new(program),
        };
        debug!("Prepared {:?} command for {:?}", self, program);
        cmd
    }

    pub fn is_elevated(&self) -> bool {
        !matches!(self, Elevation::None)
    }

    /// Whether `code` means the user refused or failed authentication rather
    /// than the wrapped program failing.
    pub fn is_denial(&self, code: i32) -> bool {
        match self {
            // pkexec: 126 = dialog dismissed, 127 = not authorized
            Elevation::Pkexec => code == 126 || code == 127,
            Elevation::Sudo | Elevation::None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &Command) -> Vec<String> {
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_prefix() {
        let mut cmd = Elevation::Pkexec.command("/usr/bin/intel-undervolt");
        cmd.arg("apply");
        assert_eq!(argv(&cmd), ["pkexec", "/usr/bin/intel-undervolt", "apply"]);

        let cmd = Elevation::Sudo.command("intel-undervolt");
        assert_eq!(argv(&cmd), ["sudo", "--", "intel-undervolt"]);

        let cmd = Elevation::None.command("intel-undervolt");
        assert_eq!(argv(&cmd), ["intel-undervolt"]);
    }

    #[test]
    fn test_denial_codes() {
        assert!(Elevation::Pkexec.is_denial(126));
        assert!(Elevation::Pkexec.is_denial(127));
        assert!(!Elevation::Pkexec.is_denial(1));
        assert!(!Elevation::None.is_denial(127));
        assert!(!Elevation::None.is_elevated());
    }
}
