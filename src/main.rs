use clap::Parser;
use log::{debug, error, info, warn};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{env, process};

use linux_undervolt::{
    args::{OffsetArgs, Toggle},
    config::{self, Settings},
    core::{pipeline::backup_undervolt_file, store, ApplyPipeline, Offsets, ProfileStore},
    error::{ApplyError, ConfigError, FsOpError},
    system::{
        current_source, fsops, prereq, Elevation, HookContext, PowerEventHook, Privileged,
        StartupHook,
    },
    utils::logging,
    Args, Command,
};

fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    if let Err(e) = run(args) {
        error!("{}", e);
        match e.downcast_ref::<ApplyError>() {
            Some(apply) => eprintln!("error ({} step): {}", apply.stage().label(), apply),
            None => eprintln!("error: {}", e),
        }
        process::exit(exit_code(e.as_ref()));
    }
}

/// The external tool's exit code when there is one, so callers (udev units,
/// front ends) can tell failures apart.
fn exit_code(e: &(dyn Error + 'static)) -> i32 {
    if let Some(apply) = e.downcast_ref::<ApplyError>() {
        if matches!(apply, ApplyError::Interrupted) {
            return 130;
        }
        return apply.exit_code().filter(|c| *c != 0).unwrap_or(1);
    }
    if let Some(FsOpError::Conflict(_)) = e.downcast_ref::<FsOpError>() {
        return fsops::EXIT_CONFLICT;
    }
    1
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    // Privileged helpers run under pkexec/sudo and must not touch the
    // invoking user's config or store.
    match &args.command {
        Command::ReplaceFile {
            staged,
            target,
            expect_sha256,
        } => {
            fsops::replace_file(staged, target, expect_sha256.as_deref())?;
            return Ok(());
        }
        Command::RemoveFile { path } => {
            fsops::remove_file(path)?;
            return Ok(());
        }
        _ => {}
    }

    let settings = config::load_config(args.config.as_deref())?;
    let app = App::new(&args, settings)?;

    match args.command {
        Command::Init {
            undervolt_path,
            force,
        } => app.init(undervolt_path, force),
        Command::Show { key } => app.show(key.as_deref()),
        Command::Profile { index, offsets } => app.profile(index, &offsets),
        Command::Set { key, value } => {
            app.load()?.change_setting(&key, &value)?;
            println!("{} = {}", key, value);
            Ok(())
        }
        Command::SetProfile { index } => {
            let mut store = app.load()?;
            let report = app.pipeline.switch_and_apply(&mut store, index)?;
            println!("Profile {} applied to {}", report.profile, report.undervolt_path.display());
            Ok(())
        }
        Command::Apply => {
            let report = app.pipeline.run(&app.load()?)?;
            println!("Profile {} applied to {}", report.profile, report.undervolt_path.display());
            Ok(())
        }
        Command::Export { path } => {
            app.load()?.export_to(&path)?;
            println!("Exported to {}", path.display());
            Ok(())
        }
        Command::Import { path } => {
            app.load_or_create()?.import_from(&path)?;
            println!("Imported {}", path.display());
            Ok(())
        }
        Command::PowerSwitch { state, battery, ac } => match (state, battery, ac) {
            (Toggle::Enable, Some(battery), Some(ac)) => app.enable_power_switch(battery, ac),
            (Toggle::Enable, _, _) => Err("--battery and --ac are required".into()),
            (Toggle::Disable, _, _) => app.disable_power_switch(),
        },
        Command::Startup { state } => app.startup(state),
        Command::RestoreBackup => {
            let store = app.load()?;
            app.pipeline
                .restore(&app.backup_path(), &store.settings().undervolt_path)?;
            println!("Restored {}", store.settings().undervolt_path.display());
            Ok(())
        }
        Command::Doctor => app.doctor(),
        Command::ReplaceFile { .. } | Command::RemoveFile { .. } => Ok(()),
    }
}

struct App {
    settings: Settings,
    store_path: PathBuf,
    privileged: Privileged,
    pipeline: ApplyPipeline,
    hooks: HookContext,
}

impl App {
    fn new(args: &Args, settings: Settings) -> Result<Self, Box<dyn Error>> {
        let store_path = match args.store.clone().or_else(|| settings.store_path.clone()) {
            Some(path) => path,
            None => config::user_config_dir()
                .map(|dir| dir.join(config::STORE_FILE))
                .ok_or("cannot determine the user configuration directory; pass --store")?,
        };
        let binary = match &settings.binary_path {
            Some(path) => path.clone(),
            None => env::current_exe()?,
        };
        let elevation = if args.no_elevate {
            Elevation::None
        } else {
            settings.elevation
        };
        debug!("Store {}, elevation {:?}", store_path.display(), elevation);

        let privileged = Privileged::new(elevation, binary.clone());

        // Ctrl-C while the apply tool runs kills it instead of leaving it
        // behind a half-finished apply. Other commands keep the default
        // signal behavior.
        let cancel = Arc::new(AtomicBool::new(false));
        if args.command.runs_apply() {
            let flag = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                info!("Interrupt received, stopping...");
                flag.store(true, Ordering::SeqCst);
            }) {
                warn!("Could not install interrupt handler: {}", e);
            }
        }

        let pipeline = ApplyPipeline::new(
            privileged.clone(),
            settings.apply_command.clone(),
            Duration::from_secs(settings.apply_timeout_sec),
        )
        .with_cancel(cancel);

        let hooks = HookContext {
            systemd_dir: settings.systemd_dir.clone(),
            udev_rules_dir: settings.udev_rules_dir.clone(),
            binary,
            store_path: store_path.clone(),
            systemctl: settings.systemctl.clone(),
            reload_udev: settings.reload_udev.clone(),
        };

        Ok(App {
            settings,
            store_path,
            privileged,
            pipeline,
            hooks,
        })
    }

    fn load(&self) -> Result<ProfileStore, Box<dyn Error>> {
        match ProfileStore::load(&self.store_path) {
            Ok(store) => Ok(store),
            Err(ConfigError::NotFound(path)) => Err(format!(
                "no profile store at {}; run `linux-undervolt init` first",
                path.display()
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_or_create(&self) -> Result<ProfileStore, Box<dyn Error>> {
        match ProfileStore::load(&self.store_path) {
            Err(ConfigError::NotFound(_)) => Ok(ProfileStore::create_default(
                &self.store_path,
                &self.settings.default_undervolt_path,
            )?),
            other => Ok(other?),
        }
    }

    fn backup_path(&self) -> PathBuf {
        self.store_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(config::BACKUP_FILE)
    }

    fn init(&self, undervolt_path: Option<PathBuf>, force: bool) -> Result<(), Box<dyn Error>> {
        if self.store_path.exists() && !force {
            return Err(format!(
                "{} already exists; pass --force to overwrite it",
                self.store_path.display()
            )
            .into());
        }

        let tool = self.settings.apply_command.first().map(String::as_str).unwrap_or("");
        let prereqs = prereq::check(tool);
        if !prereqs.satisfied() {
            warn!("Prerequisites not met: {:?}; run `linux-undervolt doctor`", prereqs);
        }

        let undervolt_path =
            undervolt_path.unwrap_or_else(|| self.settings.default_undervolt_path.clone());
        let store = ProfileStore::create_default(&self.store_path, &undervolt_path)?;
        println!("Created {}", store.path().display());

        if undervolt_path.exists() {
            if backup_undervolt_file(&undervolt_path, &self.backup_path())? {
                println!("Backed up {} to {}", undervolt_path.display(), self.backup_path().display());
            }
        } else {
            warn!("{} does not exist yet", undervolt_path.display());
        }
        Ok(())
    }

    fn show(&self, key: Option<&str>) -> Result<(), Box<dyn Error>> {
        let store = self.load()?;

        if let Some(key) = key {
            println!("{}", store.setting(key)?);
            return Ok(());
        }

        println!("[{}]", store::SETTINGS_SECTION);
        for (key, value) in store.settings_map() {
            println!("{} = {}", key, value);
        }
        for index in 0..store.profile_count() {
            let marker = if index == store.settings().active_profile { " (active)" } else { "" };
            println!("\n[{}]{}", index, marker);
            print_offsets(&store.profile_offsets(index)?);
        }
        Ok(())
    }

    fn profile(&self, index: usize, args: &OffsetArgs) -> Result<(), Box<dyn Error>> {
        let mut store = self.load()?;
        let mut offsets = store.profile_offsets(index)?;

        if !args.is_empty() {
            let updates = [
                (args.cpu, &mut offsets.cpu),
                (args.gpu, &mut offsets.gpu),
                (args.cpu_cache, &mut offsets.cpu_cache),
                (args.sys_agent, &mut offsets.sys_agent),
                (args.analog_io, &mut offsets.analog_io),
            ];
            for (value, field) in updates {
                if let Some(value) = value {
                    *field = value;
                }
            }
            store.change_profile_offsets(Some(index), offsets)?;
        }

        println!("[{}]", index);
        print_offsets(&offsets);
        Ok(())
    }

    fn enable_power_switch(&self, battery: usize, ac: usize) -> Result<(), Box<dyn Error>> {
        let mut store = self.load()?;
        store.change_settings([
            (store::KEY_BATTERY_PROFILE, battery.to_string()),
            (store::KEY_AC_PROFILE, ac.to_string()),
        ])?;

        PowerEventHook::new(&self.hooks, &self.privileged).install(battery, ac)?;
        store.change_setting(store::KEY_BATTERY_SWITCH, "true")?;
        println!("Profile switching on power change is active");

        // The rule only fires on transitions; bring the current state in line now.
        match current_source(&self.settings.power_supply_path) {
            Ok(Some(source)) => {
                if let Some(index) = source.profile(store.settings()) {
                    info!("Currently on {:?}, switching to profile {}", source, index);
                    if let Err(e) = self.pipeline.switch_and_apply(&mut store, index) {
                        warn!("Could not apply profile {} for {:?}: {}", index, source, e);
                    }
                }
            }
            Ok(None) => debug!("No mains adapter found, leaving active profile as is"),
            Err(e) => warn!("Could not read power state: {}", e),
        }
        Ok(())
    }

    fn disable_power_switch(&self) -> Result<(), Box<dyn Error>> {
        let mut store = self.load()?;
        let removed = PowerEventHook::new(&self.hooks, &self.privileged).remove()?;
        store.change_setting(store::KEY_BATTERY_SWITCH, "false")?;
        println!(
            "Profile switching on power change is off{}",
            if removed { "" } else { " (was not installed)" }
        );
        Ok(())
    }

    fn startup(&self, state: Toggle) -> Result<(), Box<dyn Error>> {
        let mut store = self.load()?;
        let hook = StartupHook::new(&self.hooks, &self.privileged);

        match state {
            Toggle::Enable => {
                hook.install()?;
                store.change_setting(store::KEY_STARTUP, "1")?;
                println!("The active profile will be applied at boot");
            }
            Toggle::Disable => {
                hook.remove()?;
                store.change_setting(store::KEY_STARTUP, "0")?;
                println!("Apply at boot disabled");
            }
        }
        Ok(())
    }

    fn doctor(&self) -> Result<(), Box<dyn Error>> {
        let tool = self.settings.apply_command.first().map(String::as_str).unwrap_or("");
        let prereqs = prereq::check(tool);

        match &prereqs.tool {
            Some(path) => println!("apply tool: {}", path.display()),
            None => println!("apply tool: {} not found on PATH", tool),
        }
        println!(
            "cpu vendor: {}",
            prereqs.cpu_vendor.as_deref().unwrap_or("unknown")
        );

        if prereqs.satisfied() {
            println!("All prerequisites met");
            Ok(())
        } else {
            Err("prerequisites not met (intel-undervolt and an Intel CPU are required)".into())
        }
    }
}

fn print_offsets(offsets: &Offsets) {
    for (component, value) in offsets.iter() {
        println!("{} = {}", component.key(), value);
    }
}
