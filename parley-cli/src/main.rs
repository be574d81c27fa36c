//! parley: line-mode client for a realtime chat server.
//!
//!   parley register <username>            enroll; writes the OTP QR code PNG
//!   parley login <username> --otp <code>  sign in and save the session
//!   parley logout                         forget the saved session
//!   parley history                        print the server history
//!   parley upload <file>                  share a file
//!   parley [chat]                         live chat

mod chat;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parley_sdk::api::HttpApi;
use parley_sdk::auth::{AuthTokenGateway, Credential};
use parley_sdk::store::{self, SessionStore, StoredSession, TomlSessionStore};
use tracing_subscriber::EnvFilter;

use config::{Config, Resolved};

#[derive(Parser)]
#[command(name = "parley", about = "Line-mode chat client")]
pub(crate) struct Cli {
    /// Server URL (http[s]://host[:port])
    #[arg(long, global = true, env = "PARLEY_SERVER")]
    pub server: Option<String>,

    /// Reconnect delay unit in milliseconds
    #[arg(long, global = true)]
    pub reconnect_base_ms: Option<u64>,

    /// Reconnect delay cap in milliseconds
    #[arg(long, global = true)]
    pub reconnect_cap_ms: Option<u64>,

    /// Live-stream handshake timeout in seconds
    #[arg(long, global = true)]
    pub handshake_timeout_secs: Option<u64>,

    /// History fetch timeout in seconds
    #[arg(long, global = true)]
    pub history_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Enroll a username and save its one-time-password QR code
    Register {
        username: String,
        /// Where to write the QR code (default: <username>-otp.png)
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },
    /// Sign in with a one-time password
    Login {
        username: String,
        #[arg(long)]
        otp: String,
    },
    /// Forget the saved session
    Logout,
    /// Print the server history
    History,
    /// Upload a file to the chat
    Upload {
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Live chat (default)
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with PARLEY_LOG_JSON=1, human-readable otherwise. Always stderr.
    let json_logs = std::env::var("PARLEY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("parley=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let resolved = Resolved::merge(&cli, &Config::load())?;
    let store = TomlSessionStore::default_location();
    let gateway = Arc::new(AuthTokenGateway::new());
    store::restore_into(&store, &gateway);
    let api = HttpApi::new(resolved.endpoint.clone());

    match cli.command.unwrap_or(Cmd::Chat) {
        Cmd::Register { username, qr_out } => {
            let png = api.register(&username).await?;
            let path = qr_out.unwrap_or_else(|| PathBuf::from(format!("{}-otp.png", username.trim())));
            std::fs::write(&path, png).with_context(|| format!("writing {}", path.display()))?;
            println!("Registered {}. Scan {} with your authenticator app.", username.trim(), path.display());
        }
        Cmd::Login { username, otp } => {
            let token = api.login(&username, &otp).await?;
            gateway.set_credential(&token, &username)?;
            store.save(&StoredSession {
                access_token: token,
                username: username.trim().to_string(),
            })?;
            println!("Logged in as {}", username.trim());
        }
        Cmd::Logout => {
            gateway.clear();
            store.clear()?;
            println!("Logged out");
        }
        Cmd::History => {
            let credential = signed_in(&gateway)?;
            let entries = forget_if_rejected(api.history(&credential).await, &store)?;
            for entry in &entries {
                println!("{}", chat::render(entry, api.endpoint()));
            }
        }
        Cmd::Upload { file, content_type } => {
            let credential = signed_in(&gateway)?;
            let upload = api.upload_file(&credential, &file, content_type.as_deref()).await;
            forget_if_rejected(upload, &store)?;
            println!("Uploaded {}", file.display());
        }
        Cmd::Chat => {
            signed_in(&gateway)?;
            chat::run(resolved.connect_config(), gateway, &store).await?;
        }
    }
    Ok(())
}

fn signed_in(gateway: &AuthTokenGateway) -> Result<Credential> {
    match gateway.credential() {
        Ok(c) => Ok(c),
        Err(_) => bail!("not logged in; run `parley login <username> --otp <code>`"),
    }
}

/// Clear the saved session when the server rejected it.
fn forget_if_rejected<T>(result: parley_sdk::Result<T>, store: &dyn SessionStore) -> Result<T> {
    match result {
        Err(e @ parley_sdk::Error::AuthenticationFailed(_)) => {
            store.clear()?;
            Err(anyhow::Error::new(e).context("saved session was rejected; log in again"))
        }
        other => Ok(other?),
    }
}
