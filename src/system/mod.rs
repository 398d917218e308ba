pub mod elevation;
pub mod fsops;
pub mod hook;
pub mod power;
pub mod prereq;
pub mod process;

pub use elevation::Elevation;
pub use fsops::Privileged;
pub use hook::{HookContext, PowerEventHook, StartupHook};
pub use power::{current_source, PowerSource};
