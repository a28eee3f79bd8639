//!
//! pulse_cli
//! ---------
//! Command-line client over the session store and data router. Runs a single
//! command, or an interactive interpreter with `--repl`. The session persists in
//! the state directory between invocations, so `login` in one run is restored in
//! the next.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use pulse::cli::{self, outputformatter, Command};
use pulse::config::AuthBackendKind;
use pulse::storage::{FileStore, SharedStore};
use pulse::{Config, DataRouter, SessionStore};

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {program} [--api-url URL] [--backend mock|rest|baas] [--state-dir DIR] <command> [args]\n       {program} --repl\n\n{}\n\nEnvironment: PULSE_API_URL, PULSE_BAAS_URL, PULSE_BAAS_ANON_KEY, PULSE_AUTH_BACKEND, PULSE_STATE_DIR\nSet PULSE_OUTPUT=json to print raw JSON instead of tables.",
        cli::help_text()
    );
}

async fn run_one(router: &DataRouter, words: &[String]) -> bool {
    let result = match Command::parse(words) {
        Ok(cmd) => cli::execute(router, &cmd).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(serde_json::Value::String(text)) => {
            println!("{}", text);
            true
        }
        Ok(v) => {
            outputformatter::print_result(&v);
            true
        }
        Err(e) => {
            eprintln!("error: {}", e);
            false
        }
    }
}

fn run_repl(rt: &tokio::runtime::Runtime, router: &DataRouter, history: PathBuf) -> Result<()> {
    let mut rl = DefaultEditor::new().context("Failed to start line editor")?;
    let _ = rl.load_history(&history);
    println!("pulse interpreter. Type 'help' for commands, 'quit' to leave.");
    loop {
        let prompt = match router.session().identity() {
            Some(id) => format!("{}> ", id.email),
            None => "pulse> ".to_string(),
        };
        let line = match rl.readline(&prompt) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() { continue; }
        let _ = rl.add_history_entry(line);
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") { break; }
        if line.eq_ignore_ascii_case("status") {
            println!("session: {}", router.session().state().label());
            continue;
        }
        rt.block_on(run_one(router, &cli::split_line(line)));
    }
    if let Err(e) = rl.save_history(&history) {
        eprintln!("could not save history: {}", e);
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut cfg = Config::from_env()?;
    let mut repl = false;
    let mut words: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" | "--backend" | "--state-dir" if i + 1 >= args.len() => {
                eprintln!("{} requires a value", args[i]);
                print_usage(&program);
                std::process::exit(2);
            }
            "--api-url" => { cfg.api_url = args[i + 1].clone(); i += 2; continue; }
            "--backend" => { cfg.auth_backend = args[i + 1].parse::<AuthBackendKind>()?; i += 2; continue; }
            "--state-dir" => { cfg.state_dir = PathBuf::from(&args[i + 1]); i += 2; continue; }
            "--repl" => { repl = true; i += 1; continue; }
            "-h" | "--help" if words.is_empty() => {
                print_usage(&program);
                return Ok(());
            }
            _ => {
                // everything from the command name on belongs to the command
                words.extend(args[i..].iter().cloned());
                break;
            }
        }
    }
    if !repl && words.is_empty() {
        print_usage(&program);
        std::process::exit(2);
    }

    let store: SharedStore = Arc::new(
        FileStore::in_dir(&cfg.state_dir).with_context(|| format!("Failed to open state in {}", cfg.state_dir.display()))?,
    );
    let client = reqwest::Client::builder().cookie_store(true).build().context("Failed to build HTTP client")?;
    let session = Arc::new(SessionStore::from_config(&cfg, store, client.clone()));
    let router = DataRouter::new(&cfg, session.clone(), client);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;
    let state = rt.block_on(session.initialize());
    info!(target: "pulse", "session {} (backend {:?}, api {})", state.label(), cfg.auth_backend, cfg.api_base());

    if repl {
        return run_repl(&rt, &router, cfg.state_dir.join("history.txt"));
    }
    if !rt.block_on(run_one(&router, &words)) {
        std::process::exit(1);
    }
    Ok(())
}
