use log::debug;
use std::fs;
use std::io;
use std::path::Path;

use crate::core::store::GlobalSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    Ac,
    Battery,
}

impl PowerSource {
    /// The profile configured for this source, if any.
    pub fn profile(&self, settings: &GlobalSettings) -> Option<usize> {
        match self {
            PowerSource::Ac => settings.ac_profile,
            PowerSource::Battery => settings.battery_profile,
        }
    }
}

/// Reads the mains adapter state under `power_path` (normally
/// `/sys/class/power_supply`). `None` when no adapter is present.
pub fn current_source(power_path: &Path) -> io::Result<Option<PowerSource>> {
    for entry in fs::read_dir(power_path)? {
        let path = entry?.path();

        let is_mains = fs::read_to_string(path.join("type"))
            .map(|t| t.trim() == "Mains")
            .unwrap_or_else(|_| path.to_string_lossy().contains("AC"));
        if !is_mains {
            continue;
        }

        if let Ok(content) = fs::read_to_string(path.join("online")) {
            let source = if content.trim() == "0" {
                PowerSource::Battery
            } else {
                PowerSource::Ac
            };
            debug!("Power state: {:?} ({})", source, path.display());
            return Ok(Some(source));
        }
    }

    debug!("No mains adapter found under {}", power_path.display());
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supply(root: &Path, name: &str, kind: &str, online: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("type"), format!("{}\n", kind)).unwrap();
        if let Some(online) = online {
            fs::write(dir.join("online"), format!("{}\n", online)).unwrap();
        }
    }

    #[test]
    fn test_on_battery() {
        let dir = TempDir::new().unwrap();
        supply(dir.path(), "BAT0", "Battery", None);
        supply(dir.path(), "ADP1", "Mains", Some("0"));
        assert_eq!(current_source(dir.path()).unwrap(), Some(PowerSource::Battery));
    }

    #[test]
    fn test_on_ac() {
        let dir = TempDir::new().unwrap();
        supply(dir.path(), "AC", "Mains", Some("1"));
        assert_eq!(current_source(dir.path()).unwrap(), Some(PowerSource::Ac));
    }

    #[test]
    fn test_no_adapter() {
        let dir = TempDir::new().unwrap();
        supply(dir.path(), "BAT0", "Battery", None);
        assert_eq!(current_source(dir.path()).unwrap(), None);
        assert!(current_source(&dir.path().join("missing")).is_err());
    }
}
