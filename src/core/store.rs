//! Profile store: global settings plus N undervolt profiles, persisted as one
//! INI-style file.
//!
//! Every mutation is validated against a copy of the in-memory state and only
//! committed once the whole file has been rewritten, so the file on disk always
//! matches the last completed mutation.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use log::{debug, info};
use tempfile::NamedTempFile;

use super::offsets::{Component, Offsets};
use crate::error::ConfigError;
use crate::system::fsops::preserve_metadata;

pub const DEFAULT_PROFILE_COUNT: usize = 4;
pub const SETTINGS_SECTION: &str = "SETTINGS";

pub const KEY_PROFILE: &str = "profile";
pub const KEY_UNDERVOLT_PATH: &str = "undervolt_path";
pub const KEY_BATTERY_SWITCH: &str = "battery_switch";
pub const KEY_BATTERY_PROFILE: &str = "battery_profile";
pub const KEY_AC_PROFILE: &str = "ac_profile";
pub const KEY_STARTUP: &str = "startup";
pub const KEY_ADVANCED: &str = "advanced";

/// Setting keys in the order they are written.
pub const SETTING_KEYS: [&str; 7] = [
    KEY_PROFILE,
    KEY_UNDERVOLT_PATH,
    KEY_BATTERY_SWITCH,
    KEY_BATTERY_PROFILE,
    KEY_AC_PROFILE,
    KEY_STARTUP,
    KEY_ADVANCED,
];

/// The `[SETTINGS]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub active_profile: usize,
    /// Empty until the user points the store at an undervolt file.
    pub undervolt_path: PathBuf,
    pub battery_switch: bool,
    pub battery_profile: Option<usize>,
    pub ac_profile: Option<usize>,
    pub startup: bool,
    /// Only used by front ends; persisted so they can share the file.
    pub advanced: bool,
}

impl GlobalSettings {
    fn new(undervolt_path: PathBuf) -> Self {
        GlobalSettings {
            active_profile: 0,
            undervolt_path,
            battery_switch: false,
            battery_profile: None,
            ac_profile: None,
            startup: false,
            advanced: false,
        }
    }

    /// Textual form of a setting, exactly as it is written to disk.
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            KEY_PROFILE => self.active_profile.to_string(),
            KEY_UNDERVOLT_PATH => self.undervolt_path.display().to_string(),
            KEY_BATTERY_SWITCH => self.battery_switch.to_string(),
            KEY_BATTERY_PROFILE => optional_index(self.battery_profile),
            KEY_AC_PROFILE => optional_index(self.ac_profile),
            KEY_STARTUP => flag(self.startup),
            KEY_ADVANCED => flag(self.advanced),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            KEY_PROFILE => self.active_profile = value.trim().parse().map_err(|_| invalid())?,
            KEY_UNDERVOLT_PATH => self.undervolt_path = storable_path(value).ok_or_else(invalid)?,
            KEY_BATTERY_SWITCH => self.battery_switch = parse_bool(value).ok_or_else(invalid)?,
            KEY_BATTERY_PROFILE => {
                self.battery_profile = parse_optional_index(value).ok_or_else(invalid)?
            }
            KEY_AC_PROFILE => self.ac_profile = parse_optional_index(value).ok_or_else(invalid)?,
            KEY_STARTUP => self.startup = parse_bool(value).ok_or_else(invalid)?,
            KEY_ADVANCED => self.advanced = parse_bool(value).ok_or_else(invalid)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn validate_references(&self, count: usize) -> Result<(), ConfigError> {
        let refs = [
            (KEY_PROFILE, Some(self.active_profile)),
            (KEY_BATTERY_PROFILE, self.battery_profile),
            (KEY_AC_PROFILE, self.ac_profile),
        ];

        for (key, index) in refs {
            if let Some(index) = index {
                if index >= count {
                    return Err(ConfigError::InvalidReference {
                        key: key.to_string(),
                        index: index.to_string(),
                        count,
                    });
                }
            }
        }
        Ok(())
    }
}

/// The INI reader trims values and stops at line breaks, so such paths cannot
/// survive a save and reload.
fn storable_path(value: &str) -> Option<PathBuf> {
    if value != value.trim() || value.chars().any(char::is_control) {
        return None;
    }
    Some(PathBuf::from(value))
}

/// Escapes a value for the INI reader, which treats backslashes as escapes and
/// strips a leading quote.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' | '\'' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn optional_index(index: Option<usize>) -> String {
    index.map(|i| i.to_string()).unwrap_or_default()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `Some(None)` for an unset reference, `None` when the value does not parse.
fn parse_optional_index(value: &str) -> Option<Option<usize>> {
    let value = value.trim();
    if value.is_empty() {
        return Some(None);
    }
    value.parse().ok().map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStore {
    path: PathBuf,
    settings: GlobalSettings,
    profiles: Vec<Offsets>,
}

impl ProfileStore {
    /// Reads the store at `path`. A missing file is reported as
    /// [`ConfigError::NotFound`]; creating defaults is up to the caller.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let (settings, profiles) = read_document(path)?;
        info!(
            "Loaded profile store from {} ({} profiles, active {})",
            path.display(),
            profiles.len(),
            settings.active_profile
        );

        Ok(ProfileStore {
            path: path.to_path_buf(),
            settings,
            profiles,
        })
    }

    /// Creates a store with [`DEFAULT_PROFILE_COUNT`] all-zero profiles and
    /// writes it to `path`.
    pub fn create_default(path: &Path, undervolt_path: &Path) -> Result<Self, ConfigError> {
        Self::create(path, undervolt_path, DEFAULT_PROFILE_COUNT)
    }

    pub fn create(
        path: &Path,
        undervolt_path: &Path,
        profile_count: usize,
    ) -> Result<Self, ConfigError> {
        if profile_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "profile_count".to_string(),
                value: "0".to_string(),
            });
        }

        let undervolt_path = undervolt_path
            .to_str()
            .and_then(storable_path)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: KEY_UNDERVOLT_PATH.to_string(),
                value: undervolt_path.display().to_string(),
            })?;

        let store = ProfileStore {
            path: path.to_path_buf(),
            settings: GlobalSettings::new(undervolt_path),
            profiles: vec![Offsets::default(); profile_count],
        };
        store.save()?;
        info!("Created default profile store at {}", path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Every setting in its persisted textual form, in file order.
    pub fn settings_map(&self) -> Vec<(&'static str, String)> {
        SETTING_KEYS
            .iter()
            .filter_map(|key| self.settings.get(key).map(|v| (*key, v)))
            .collect()
    }

    pub fn setting(&self, key: &str) -> Result<String, ConfigError> {
        self.settings
            .get(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    pub fn active_profile_offsets(&self) -> Offsets {
        // `active_profile` is validated on every load and mutation.
        self.profiles[self.settings.active_profile]
    }

    pub fn profile_offsets(&self, index: usize) -> Result<Offsets, ConfigError> {
        self.profiles
            .get(index)
            .copied()
            .ok_or(ConfigError::ProfileNotFound(index))
    }

    pub fn change_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.change_settings([(key, value)])
    }

    /// Applies all changes or none of them. References to profiles are checked
    /// before anything is written.
    pub fn change_settings<I, K, V>(&mut self, changes: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut updated = self.settings.clone();
        for (key, value) in changes {
            debug!("Setting {} = {:?}", key.as_ref(), value.as_ref());
            updated.set(key.as_ref(), value.as_ref())?;
        }
        updated.validate_references(self.profiles.len())?;

        self.commit(updated, self.profiles.clone())
    }

    pub fn set_active_profile(&mut self, index: usize) -> Result<(), ConfigError> {
        self.change_setting(KEY_PROFILE, &index.to_string())
    }

    /// Replaces all five offsets of a profile; `None` targets the active one.
    pub fn change_profile_offsets(
        &mut self,
        index: Option<usize>,
        offsets: Offsets,
    ) -> Result<(), ConfigError> {
        let index = index.unwrap_or(self.settings.active_profile);
        if index >= self.profiles.len() {
            return Err(ConfigError::ProfileNotFound(index));
        }

        let mut profiles = self.profiles.clone();
        profiles[index] = offsets;
        debug!("Profile {} offsets set to {:?}", index, offsets);
        self.commit(self.settings.clone(), profiles)
    }

    pub fn export_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_atomic(path, &self.render())?;
        info!("Exported profile store to {}", path.display());
        Ok(())
    }

    /// Replaces the whole store with the contents of `path` and persists the
    /// result at the store's own location.
    pub fn import_from(&mut self, path: &Path) -> Result<(), ConfigError> {
        let (settings, profiles) = read_document(path)?;
        self.commit(settings, profiles)?;
        info!("Imported profile store from {}", path.display());
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        write_atomic(&self.path, &self.render())?;
        debug!("Saved profile store to {}", self.path.display());
        Ok(())
    }

    /// Writes the candidate state first and only then adopts it in memory.
    fn commit(
        &mut self,
        settings: GlobalSettings,
        profiles: Vec<Offsets>,
    ) -> Result<(), ConfigError> {
        let candidate = ProfileStore {
            path: self.path.clone(),
            settings,
            profiles,
        };
        candidate.save()?;
        *self = candidate;
        Ok(())
    }

    /// Serialises the store: SETTINGS first, then profiles by ascending index.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "[{}]", SETTINGS_SECTION);
        for (key, value) in self.settings_map() {
            let _ = writeln!(out, "{} = {}", key, escape_value(&value));
        }

        for (index, offsets) in self.profiles.iter().enumerate() {
            let _ = writeln!(out, "\n[{}]", index);
            for (component, value) in offsets.iter() {
                let _ = writeln!(out, "{} = {}", component.key(), value);
            }
        }

        out
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_document(path: &Path) -> Result<(GlobalSettings, Vec<Offsets>), ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let sections: HashMap<String, HashMap<String, String>> = Config::builder()
        .add_source(File::from_str(&text, FileFormat::Ini))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| corrupt(path, e.to_string()))?;

    let mut settings_section = None;
    let mut profile_sections = BTreeMap::new();

    for (name, keys) in &sections {
        if name.eq_ignore_ascii_case(SETTINGS_SECTION) {
            settings_section = Some(keys);
        } else if let Ok(index) = name.trim().parse::<usize>() {
            profile_sections.insert(index, keys);
        } else {
            debug!("Ignoring unknown section [{}] in {}", name, path.display());
        }
    }

    let settings_section = settings_section
        .ok_or_else(|| corrupt(path, format!("missing [{}] section", SETTINGS_SECTION)))?;

    for required in [KEY_PROFILE, KEY_UNDERVOLT_PATH] {
        if !settings_section.contains_key(required) {
            return Err(corrupt(path, format!("missing setting {}", required)));
        }
    }

    // Files written by older versions may lack the later keys; those keep
    // their defaults.
    let mut settings = GlobalSettings::new(PathBuf::new());
    for (key, value) in settings_section {
        match settings.set(key, value) {
            Ok(()) => {}
            Err(ConfigError::UnknownKey(key)) => {
                debug!("Ignoring unknown setting {} in {}", key, path.display())
            }
            Err(e) => return Err(corrupt(path, e.to_string())),
        }
    }

    if profile_sections.is_empty() {
        return Err(corrupt(path, "no profile sections"));
    }

    let mut profiles = Vec::with_capacity(profile_sections.len());
    for (expected, (index, keys)) in profile_sections.into_iter().enumerate() {
        if index != expected {
            return Err(corrupt(path, format!("profile {} is missing", expected)));
        }
        profiles.push(read_offsets(path, index, keys)?);
    }

    settings.validate_references(profiles.len())?;
    Ok((settings, profiles))
}

fn read_offsets(
    path: &Path,
    index: usize,
    keys: &HashMap<String, String>,
) -> Result<Offsets, ConfigError> {
    let mut offsets = Offsets::default();

    for component in Component::ALL {
        let raw = keys.get(component.key()).ok_or_else(|| {
            corrupt(path, format!("profile {} is missing {}", index, component))
        })?;
        let value = raw.trim().parse().map_err(|_| {
            corrupt(
                path,
                format!("profile {} has invalid {} value {:?}", index, component, raw),
            )
        })?;
        offsets.set(component, value);
    }

    Ok(offsets)
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    preserve_metadata(path, tmp.path())?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
