//! Example: interactive shell against an in-memory account store
//!
//! Usage:
//!   MEGA_API_KEY=demo cargo run --example shell
//!
//! Log in with `login demo@example.com demo`. The session is saved to
//! `megashell_session.json` on quit; the in-memory store does not survive a
//! restart, so a resumed session can browse its cached tree but remote calls
//! will report an expired session until the next `logout`/`login`.

use std::io::Write;
use std::sync::Arc;

use megashell::{ClientConfig, Flow, MemoryTransport, SessionClient, Shell, ShellCommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("megashell=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn demo_store() -> megashell::Result<MemoryTransport> {
    let store = MemoryTransport::new();
    let root = store.add_account(DEMO_EMAIL, DEMO_PASSWORD);
    let docs = store.add_folder(DEMO_EMAIL, &root, "docs")?;
    store.add_file(DEMO_EMAIL, &docs, "readme.txt", b"Welcome to megashell.\n")?;
    store.add_file(DEMO_EMAIL, &docs, "notes.md", b"# Notes\n\n- try `ls -R`\n")?;
    let photos = store.add_folder(DEMO_EMAIL, &root, "photos")?;
    store.add_file(DEMO_EMAIL, &photos, "cat.jpg", &[0xffu8; 48 * 1024])?;
    Ok(store)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let store = match demo_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Failed to seed the demo store: {}", e);
            std::process::exit(1);
        }
    };

    let history_file = config.history_file.clone();
    let client = SessionClient::load_or_new(config, Arc::new(store)).await;
    let mut shell = Shell::new(client.clone());

    let mut history = match &history_file {
        Some(path) => tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| eprintln!("⚠ History disabled ({}): {}", path.display(), e))
            .ok(),
        None => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    loop {
        print!("{}", shell.prompt());
        let _ = stdout.flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("❌ Failed to read input: {}", e);
                break;
            }
        };

        if ShellCommand::parse(&line).is_recordable() {
            if let Some(file) = history.as_mut() {
                let entry = format!("{}\n", line.trim());
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    eprintln!("⚠ History write failed: {}", e);
                }
            }
        }

        match shell.execute(&line, &mut stdout) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => {
                eprintln!("❌ Output failed: {}", e);
                break;
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        eprintln!("❌ Failed to save session: {}", e);
        std::process::exit(1);
    }
}
