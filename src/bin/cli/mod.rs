use std::process;

use ext2img::Ext2Error;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints a core failure and exits with its errno.
#[allow(dead_code)]
pub fn exit_with(context: &str, err: &Ext2Error) -> ! {
    eprintln!("{context}: {err}");
    process::exit(err.as_errno())
}

#[allow(dead_code)]
pub fn or_exit<T>(context: &str, result: ext2img::Result<T>) -> T {
    result.unwrap_or_else(|err| exit_with(context, &err))
}
