use env_logger::{Builder, Env, Target};

/// `verbose` raises the default level to `debug`; `RUST_LOG` still wins.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env = Env::default().filter_or("RUST_LOG", default_level);

    // Stdout carries command output, so logs go to stderr.
    Builder::from_env(env)
        .target(Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .init();
}
