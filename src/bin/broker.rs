//! CLI entry point: binds a broker to `--host`/`--port` and runs it until
//! killed. The ambient stack the library itself deliberately stays out of —
//! argument parsing and logger initialization — lives here instead.

use clap::Parser;

use meshpub::{Config, reactor};

/// Hierarchical publish/subscribe message broker.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Host or address to listen on.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Maximum length of the pending-connections queue.
    #[arg(long, default_value_t = 100)]
    backlog: u32,
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let config = Config { host: args.host, port: args.port, backlog: args.backlog };

    if let Err(e) = reactor::serve(&config) {
        log::error!("broker exited: {}", e);
        std::process::exit(1);
    }
}
