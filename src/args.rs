use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(version, about = "Manage and apply intel-undervolt profiles", long_about = None)]
pub struct Args {
    /// Additional configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Profile store to use instead of the configured one
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Run privileged steps directly (when already root)
    #[arg(long, global = true)]
    pub no_elevate: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct OffsetArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub cpu: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    pub gpu: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    pub cpu_cache: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    pub sys_agent: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    pub analog_io: Option<i64>,
}

impl OffsetArgs {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.gpu.is_none()
            && self.cpu_cache.is_none()
            && self.sys_agent.is_none()
            && self.analog_io.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    Enable,
    Disable,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Create the profile store with default values
    Init {
        #[arg(long)]
        undervolt_path: Option<PathBuf>,
        /// Overwrite an existing store
        #[arg(long)]
        force: bool,
    },
    /// Print settings and profiles, or a single setting
    Show { key: Option<String> },
    /// Print or edit the offsets of a profile
    Profile {
        index: usize,
        #[command(flatten)]
        offsets: OffsetArgs,
    },
    /// Change a setting
    Set { key: String, value: String },
    /// Make a profile active and apply it
    SetProfile { index: usize },
    /// Apply the active profile
    Apply,
    Export { path: PathBuf },
    Import { path: PathBuf },
    /// Switch profiles automatically on AC/battery changes
    PowerSwitch {
        state: Toggle,
        #[arg(long, required_if_eq("state", "enable"))]
        battery: Option<usize>,
        #[arg(long, required_if_eq("state", "enable"))]
        ac: Option<usize>,
    },
    /// Re-apply the active profile at boot
    Startup { state: Toggle },
    /// Put the backed-up undervolt file back and apply it
    RestoreBackup,
    /// Check that the apply tool and an Intel CPU are present
    Doctor,
    #[command(hide = true)]
    ReplaceFile {
        #[arg(long)]
        staged: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[arg(long)]
        expect_sha256: Option<String>,
    },
    #[command(hide = true)]
    RemoveFile { path: PathBuf },
}

impl Command {
    /// Whether the command runs the apply tool, which Ctrl-C should stop.
    pub fn runs_apply(&self) -> bool {
        match self {
            Command::SetProfile { .. } | Command::Apply | Command::RestoreBackup => true,
            Command::PowerSwitch { state, .. } => *state == Toggle::Enable,
            _ => false,
        }
    }
}
