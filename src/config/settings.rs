use serde::Deserialize;
use std::path::PathBuf;

use crate::system::elevation::Elevation;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where the profile store lives. Defaults to the user's config dir.
    pub store_path: Option<PathBuf>,
    /// Undervolt file recorded in a freshly created store.
    pub default_undervolt_path: PathBuf,
    pub apply_command: Vec<String>,
    pub apply_timeout_sec: u64,
    pub elevation: Elevation,
    pub systemd_dir: PathBuf,
    pub udev_rules_dir: PathBuf,
    pub systemctl: PathBuf,
    pub reload_udev: Vec<String>,
    pub power_supply_path: PathBuf,
    /// Program the installed units call back into. Defaults to this binary.
    pub binary_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            store_path: None,
            default_undervolt_path: PathBuf::from("/etc/intel-undervolt.conf"),
            apply_command: vec!["intel-undervolt".to_string(), "apply".to_string()],
            apply_timeout_sec: 30,
            elevation: Elevation::Pkexec,
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            udev_rules_dir: PathBuf::from("/etc/udev/rules.d"),
            systemctl: PathBuf::from("/usr/bin/systemctl"),
            reload_udev: vec![
                "udevadm".to_string(),
                "control".to_string(),
                "--reload".to_string(),
            ],
            power_supply_path: PathBuf::from("/sys/class/power_supply"),
            binary_path: None,
        }
    }
}
