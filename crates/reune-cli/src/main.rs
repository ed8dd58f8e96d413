//! reune - command-line access to the reune API.
//!
//! Logs in with username and password, keeps the session credentials in the
//! configured store, and issues authenticated requests. Expired access
//! tokens are renewed transparently; when renewal is impossible the session
//! is cleared and the user is asked to log in again.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use reune_core::{ApiClient, Config, SessionEvent, TerminationReason};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: reune <command> [args]

Commands:
  login [username]        Sign in and store session credentials
  logout                  Clear session credentials
  status                  Show whether a session is active
  get <path>              GET an API path and print the JSON response
  post <path> <json>      POST a JSON body
  put <path> <json>       PUT a JSON body
  patch <path> <json>     PATCH a JSON body
  delete <path>           DELETE an API path

Environment:
  REUNE_API_BASE_URL        API base URL, e.g. http://localhost:8000/api
  REUNE_CREDENTIAL_BACKEND  keyring | file | memory
  RUST_LOG                  log filter (default: warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = Config::load().context("Failed to load config")?;
    debug!(backend = ?config.credential_backend, "Config loaded");
    let api = ApiClient::from_config(&config)?;
    let mut events = api.session().subscribe();

    let result = run(&api, &mut config, command, &args).await;

    report_session_end(&mut events);
    result
}

async fn run(api: &ApiClient, config: &mut Config, command: &str, args: &[String]) -> Result<()> {
    match command {
        "login" => login(api, config, args.get(1).cloned()).await,
        "logout" => {
            if api.logout() {
                println!("Logged out.");
            }
            Ok(())
        }
        "status" => {
            if api.session().is_authenticated() {
                println!("Signed in to {}", api.base_url());
            } else {
                println!("Not signed in.");
            }
            Ok(())
        }
        "get" => {
            let path = required(args, 1, "path")?;
            print_json(&api.get_json::<Value>(path).await?)
        }
        "post" | "put" | "patch" => {
            let path = required(args, 1, "path")?;
            let body: Value = serde_json::from_str(required(args, 2, "json")?)
                .context("Request body is not valid JSON")?;
            let response: Value = match command {
                "post" => api.post_json(path, &body).await?,
                "put" => api.put_json(path, &body).await?,
                _ => api.patch_json(path, &body).await?,
            };
            print_json(&response)
        }
        "delete" => {
            let path = required(args, 1, "path")?;
            api.delete(path).await?;
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing argument <{}>\n\n{}", name, USAGE))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Tell the user to sign in again if the session ended during the command
fn report_session_end(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::LoggedOut {
            redirect_to,
            reason,
            ..
        } = event
        {
            if reason != TerminationReason::Logout {
                info!(?reason, redirect_to = %redirect_to, "Session ended");
                eprintln!("Your session has expired. Run `reune login` to sign in again.");
            }
        }
    }
}

async fn login(api: &ApiClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match (username, config.last_username.clone()) {
        (Some(username), _) => username,
        (None, Some(last_user)) => {
            print!("Username [{}]: ", last_user);
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            let input = input.trim();

            if input.is_empty() {
                last_user
            } else {
                input.to_string()
            }
        }
        (None, None) => prompt_username()?,
    };

    if username.is_empty() {
        bail!("Username required");
    }

    let password = rpassword::prompt_password("Password: ")?;

    api.login(&username, &password)
        .await
        .context("Login failed")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful!");
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}
