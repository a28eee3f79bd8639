//! pulse_seed: turn the ward/booth CSV exports and constituency GeoJSON into
//! idempotent SQL import scripts.

use std::env;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use pulse::seed::{self, SeedCommand};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = match SeedCommand::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}\n\n{}", e, seed::usage());
            std::process::exit(1);
        }
    };
    if cmd == SeedCommand::Help {
        println!("{}", seed::usage());
        return Ok(());
    }

    match seed::run(&cmd) {
        Ok(written) if written.is_empty() => {
            info!(target: "pulse::seed", "no input files found, nothing written");
            Ok(())
        }
        Ok(written) => {
            for path in &written {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            error!(target: "pulse::seed", "{}", e);
            std::process::exit(1);
        }
    }
}
