mod config;
mod swipe;

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientServices, SessionGate};
use storage::Storage;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{load_settings, normalize_database_url, Settings},
    swipe::SwipeExit,
};

#[derive(Parser, Debug)]
#[command(name = "tindev", about = "Swipe through developers from the terminal")]
struct Args {
    /// Directory backend base URL.
    #[arg(long)]
    api_url: Option<String>,
    /// Push channel path on the backend host.
    #[arg(long)]
    push_path: Option<String>,
    /// SQLite URL or file path for the persisted session.
    #[arg(long)]
    session_db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a GitHub username, reusing a stored session if present.
    Login { username: String },
    /// Forget the stored session.
    Logout,
    /// Like or dislike candidates interactively.
    Swipe,
}

fn apply_overrides(mut settings: Settings, args: &Args) -> Settings {
    if let Some(api_url) = &args.api_url {
        settings.api_url = api_url.clone();
    }
    if let Some(push_path) = &args.push_path {
        settings.push_path = push_path.clone();
    }
    if let Some(session_db) = &args.session_db {
        settings.session_database_url = session_db.clone();
    }
    settings
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let settings = apply_overrides(load_settings(), &args);

    let services = ClientServices::connect(
        &settings.api_url,
        &settings.push_path,
        settings.request_timeout(),
    )
    .with_context(|| format!("invalid api url {}", settings.api_url))?;
    let database_url = normalize_database_url(&settings.session_database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open session store {database_url}"))?;
    let gate = services.session_gate(Arc::new(storage));

    match args.command {
        Command::Login { username } => login(&gate, &username).await,
        Command::Logout => {
            gate.logout().await?;
            println!("Signed out.");
            Ok(())
        }
        Command::Swipe => swipe_session(&services, &gate, settings.request_timeout()).await,
    }
}

async fn login(gate: &SessionGate, username: &str) -> Result<()> {
    if let Some(session) = gate.resolve_session().await? {
        println!("Already signed in (session {session}). Run `tindev logout` to switch users.");
        return Ok(());
    }
    match gate.register(username).await {
        Ok(session) => {
            info!(%session, "signed in");
            println!("Signed in as {} (session {session}).", username.trim());
            Ok(())
        }
        Err(err) => bail!("{}", err.user_message()),
    }
}

async fn swipe_session(
    services: &ClientServices,
    gate: &SessionGate,
    send_grace: Duration,
) -> Result<()> {
    let Some(session) = gate.resolve_session().await? else {
        bail!("Not signed in. Run `tindev login <github-username>` first.");
    };

    let mut controller = services.candidate_controller();
    controller.initialize(session);

    let mut stdout = std::io::stdout();
    let exit = swipe::run(
        &mut controller,
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
    )
    .await;
    controller.teardown();
    // The runtime stops with `main`; give the last decisions a chance to land.
    if !controller.drain_decisions(send_grace).await {
        warn!("some decisions may not have reached the server");
    }

    match exit? {
        SwipeExit::Quit => {}
        SwipeExit::Logout => {
            gate.logout().await?;
            writeln!(stdout, "Signed out.")?;
        }
    }
    Ok(())
}
