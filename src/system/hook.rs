//! systemd/udev integration.
//!
//! The power hook is a single toggle unit: udev starts it when the machine
//! goes on battery (its `ExecStart` switches to the battery profile) and
//! stops it when mains power returns (its `ExecStop` switches to the AC
//! profile). The startup hook is a plain oneshot unit that re-applies the
//! active profile at boot.

use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use tempfile::TempDir;

use super::fsops::Privileged;
use crate::error::{HookError, HookStage};

pub const POWER_UNIT: &str = "linux-undervolt.powersave";
pub const POWER_RULE_FILE: &str = "99-linux-undervolt.rules";
pub const STARTUP_UNIT: &str = "linux-undervolt.startup";

/// Locations and commands the hooks use. Built from the application
/// configuration; nothing here is read from the environment.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub systemd_dir: PathBuf,
    pub udev_rules_dir: PathBuf,
    /// Program the installed units run (this binary).
    pub binary: PathBuf,
    pub store_path: PathBuf,
    pub systemctl: PathBuf,
    pub reload_udev: Vec<String>,
}

impl HookContext {
    fn systemctl(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.systemctl.display().to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect()
    }

    /// `ExecStart=`-style command line running this binary against the store.
    fn exec_line(&self, command: &[&str]) -> String {
        let store = self.store_path.display().to_string();
        let binary = self.binary.display().to_string();
        let mut words = vec![binary.as_str(), "--no-elevate", "--store", store.as_str()];
        words.extend_from_slice(command);
        words.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" ")
    }
}

/// Quotes one word of an `Exec*=` line. `%` is doubled so systemd does not
/// expand it as a specifier.
fn quote(word: &str) -> String {
    let word = word.replace('%', "%%");
    if word.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        word
    }
}

fn install_failed(stage: HookStage, reason: impl ToString) -> HookError {
    HookError::InstallFailed {
        stage,
        reason: reason.to_string(),
    }
}

fn remove_failed(reason: impl ToString) -> HookError {
    HookError::RemoveFailed {
        reason: reason.to_string(),
    }
}

/// Stages `files`, moves them into place with elevation, runs `reloads`, then
/// reads every file back to confirm the installed state.
fn install_files(
    privileged: &Privileged,
    files: &[(PathBuf, String)],
    reloads: &[Vec<String>],
) -> Result<(), HookError> {
    let staging = TempDir::new().map_err(|e| install_failed(HookStage::Stage, e))?;

    for (target, contents) in files {
        let name = target
            .file_name()
            .ok_or_else(|| install_failed(HookStage::Stage, "target has no file name"))?;
        let staged = staging.path().join(name);
        fs::write(&staged, contents).map_err(|e| install_failed(HookStage::Stage, e))?;

        privileged
            .replace(&staged, target, None)
            .map_err(|e| install_failed(HookStage::Move, e))?;
        debug!("Installed {}", target.display());
    }

    for argv in reloads {
        privileged
            .run(argv)
            .map_err(|e| install_failed(HookStage::Reload, format!("{:?}: {}", argv, e)))?;
    }

    for (target, contents) in files {
        match fs::read_to_string(target) {
            Ok(installed) if &installed == contents => {}
            Ok(_) => {
                return Err(install_failed(
                    HookStage::Verify,
                    format!("{} does not match what was written", target.display()),
                ))
            }
            Err(e) => {
                return Err(install_failed(
                    HookStage::Verify,
                    format!("{}: {}", target.display(), e),
                ))
            }
        }
    }

    Ok(())
}

/// Removes whichever of `files` exist. `Ok(false)` when none did.
fn remove_files(
    privileged: &Privileged,
    files: &[PathBuf],
    before: &[Vec<String>],
    after: &[Vec<String>],
) -> Result<bool, HookError> {
    let present: Vec<&PathBuf> = files.iter().filter(|f| f.exists()).collect();
    if present.is_empty() {
        debug!("Nothing installed, nothing to remove");
        return Ok(false);
    }

    for argv in before {
        if let Err(e) = privileged.run(argv) {
            warn!("{:?} failed before removal: {}", argv, e);
        }
    }

    for target in &present {
        privileged
            .remove(target)
            .map_err(|e| remove_failed(format!("{}: {}", target.display(), e)))?;
    }

    for argv in after {
        privileged
            .run(argv)
            .map_err(|e| remove_failed(format!("{:?}: {}", argv, e)))?;
    }

    if let Some(left) = files.iter().find(|f| f.exists()) {
        return Err(remove_failed(format!("{} is still present", left.display())));
    }
    Ok(true)
}

pub struct PowerEventHook<'a> {
    ctx: &'a HookContext,
    privileged: &'a Privileged,
}

impl<'a> PowerEventHook<'a> {
    pub fn new(ctx: &'a HookContext, privileged: &'a Privileged) -> Self {
        PowerEventHook { ctx, privileged }
    }

    pub fn service_path(&self) -> PathBuf {
        self.ctx.systemd_dir.join(format!("{}.service", POWER_UNIT))
    }

    pub fn rule_path(&self) -> PathBuf {
        self.ctx.udev_rules_dir.join(POWER_RULE_FILE)
    }

    pub fn render_service(&self, battery_profile: usize, ac_profile: usize) -> String {
        let battery = battery_profile.to_string();
        let ac = ac_profile.to_string();
        format!(
            "[Unit]\n\
             Description=Toggle undervolt profiles on power source change\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             RemainAfterExit=yes\n\
             ExecStart={}\n\
             ExecStop={}\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            self.ctx.exec_line(&["set-profile", &battery]),
            self.ctx.exec_line(&["set-profile", &ac]),
        )
    }

    pub fn render_rule(&self) -> String {
        let systemctl = self.ctx.systemctl.display();
        format!(
            "ACTION==\"change\", SUBSYSTEM==\"power_supply\", ENV{{POWER_SUPPLY_ONLINE}}==\"0\", RUN+=\"{} --no-block start {}\"\n\
             ACTION==\"change\", SUBSYSTEM==\"power_supply\", ENV{{POWER_SUPPLY_ONLINE}}==\"1\", RUN+=\"{} --no-block stop {}\"\n",
            systemctl, POWER_UNIT, systemctl, POWER_UNIT
        )
    }

    pub fn is_installed(&self) -> bool {
        self.service_path().exists() && self.rule_path().exists()
    }

    /// Installs (or overwrites) the unit and the udev rule.
    pub fn install(&self, battery_profile: usize, ac_profile: usize) -> Result<(), HookError> {
        info!(
            "Installing power hook (battery -> {}, AC -> {})",
            battery_profile, ac_profile
        );

        let files = [
            (
                self.service_path(),
                self.render_service(battery_profile, ac_profile),
            ),
            (self.rule_path(), self.render_rule()),
        ];
        let reloads = [
            self.ctx.reload_udev.clone(),
            self.ctx.systemctl(&["daemon-reload"]),
        ];

        install_files(self.privileged, &files, &reloads)?;
        info!("Power hook installed");
        Ok(())
    }

    /// Removes the unit and the rule. Removing a hook that is not installed
    /// succeeds and returns `false`.
    pub fn remove(&self) -> Result<bool, HookError> {
        let files = [self.rule_path(), self.service_path()];
        let after = [
            self.ctx.reload_udev.clone(),
            self.ctx.systemctl(&["daemon-reload"]),
        ];

        let removed = remove_files(self.privileged, &files, &[], &after)?;
        if removed {
            info!("Power hook removed");
        }
        Ok(removed)
    }
}

pub struct StartupHook<'a> {
    ctx: &'a HookContext,
    privileged: &'a Privileged,
}

impl<'a> StartupHook<'a> {
    pub fn new(ctx: &'a HookContext, privileged: &'a Privileged) -> Self {
        StartupHook { ctx, privileged }
    }

    pub fn service_path(&self) -> PathBuf {
        self.ctx.systemd_dir.join(format!("{}.service", STARTUP_UNIT))
    }

    pub fn render_service(&self) -> String {
        format!(
            "[Unit]\n\
             Description=Apply the active undervolt profile at boot\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart={}\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            self.ctx.exec_line(&["apply"]),
        )
    }

    pub fn is_installed(&self) -> bool {
        self.service_path().exists()
    }

    pub fn install(&self) -> Result<(), HookError> {
        let unit = format!("{}.service", STARTUP_UNIT);
        let files = [(self.service_path(), self.render_service())];
        let reloads = [
            self.ctx.systemctl(&["daemon-reload"]),
            self.ctx.systemctl(&["enable", &unit]),
        ];

        install_files(self.privileged, &files, &reloads)?;
        info!("Startup hook installed");
        Ok(())
    }

    pub fn remove(&self) -> Result<bool, HookError> {
        let unit = format!("{}.service", STARTUP_UNIT);
        let files = [self.service_path()];
        let before = [self.ctx.systemctl(&["disable", &unit])];
        let after = [self.ctx.systemctl(&["daemon-reload"])];

        let removed = remove_files(self.privileged, &files, &before, &after)?;
        if removed {
            info!("Startup hook removed");
        }
        Ok(removed)
    }
}
