//! Plugin worker binary. Spawned by the bridge with the plugin path and its
//! checksum; talks the command protocol over stdin/stdout.

use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vstmidi_host::{open_plugin, serve, Invocation};

fn main() -> ExitCode {
    // stdout is the channel to the bridge; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VSTHOST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();

    let code = match Invocation::parse(env::args_os()).and_then(|inv| open_plugin(&inv.plugin_path))
    {
        Ok(loader) => serve(stdin, stdout, loader),
        Err(e) => {
            tracing::error!("{}", e);
            let _ = stdout
                .write_all(&e.code().to_le_bytes())
                .and_then(|()| stdout.flush());
            e.code()
        }
    };

    ExitCode::from(code.min(u8::MAX as u32) as u8)
}
