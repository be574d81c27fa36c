//! Interactive chat loop: stdin lines in, feed out.
//!
//! Lines starting with `/` are commands:
//!
//!   /pause    stop following; new entries are buffered
//!   /follow   print buffered entries and follow again
//!   /check    reconnect now if a retry is pending
//!   /logout   forget the saved session and leave
//!   /quit     leave

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use parley_sdk::auth::AuthTokenGateway;
use parley_sdk::client::{self, ClientHandle, ConnectConfig};
use parley_sdk::endpoint::Endpoint;
use parley_sdk::event::Event;
use parley_sdk::feed::{EntryKind, FeedEntry};
use parley_sdk::merger::FeedNotification;
use parley_sdk::store::SessionStore;
use parley_sdk::viewport::{ViewportDecision, ViewportFollower};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config: ConnectConfig,
    gateway: Arc<AuthTokenGateway>,
    store: &dyn SessionStore,
) -> Result<()> {
    let username = gateway.username().unwrap_or_default();
    let mut view = View::new(username, config.endpoint.clone());
    let (handle, mut events) = client::connect(config, gateway.clone()).await?;
    eprintln!("* type a message and press enter; /quit to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match view.command(&line) {
                    Input::Send(text) => {
                        if let Err(e) = handle.send_chat(&text).await {
                            eprintln!("* not sent: {e}");
                        }
                    }
                    Input::CheckLiveness => handle.check_liveness().await?,
                    Input::Logout => {
                        gateway.clear();
                        store.clear()?;
                        eprintln!("* logged out");
                        break;
                    }
                    Input::Quit => break,
                    Input::None => {}
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if view.event(event) == Flow::Stop {
                    if !gateway.is_authenticated() {
                        store.clear()?;
                    }
                    break;
                }
            }
        }
    }

    shutdown(&handle).await;
    Ok(())
}

async fn shutdown(handle: &ClientHandle) {
    if let Err(e) = handle.disconnect().await {
        tracing::debug!("disconnect on exit: {e}");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    CheckLiveness,
    Logout,
    Quit,
    None,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Terminal view of the feed.
struct View {
    username: String,
    endpoint: Endpoint,
    follower: ViewportFollower,
    paused: bool,
    buffered: Vec<FeedEntry>,
}

impl View {
    fn new(username: String, endpoint: Endpoint) -> Self {
        Self {
            username,
            endpoint,
            follower: ViewportFollower::new(),
            paused: false,
            buffered: Vec::new(),
        }
    }

    fn command(&mut self, line: &str) -> Input {
        match line.trim() {
            "/quit" => Input::Quit,
            "/logout" => Input::Logout,
            "/check" => Input::CheckLiveness,
            "/pause" => {
                self.paused = true;
                eprintln!("* paused; /follow to catch up");
                Input::None
            }
            "/follow" => {
                self.paused = false;
                self.catch_up();
                Input::None
            }
            other if other.starts_with('/') => {
                eprintln!("* unknown command {other}");
                Input::None
            }
            other => Input::Send(other.to_string()),
        }
    }

    fn event(&mut self, event: Event) -> Flow {
        match event {
            Event::StateChanged { to, .. } => eprintln!("* {to}"),
            Event::ReconnectScheduled { attempt, delay } => {
                eprintln!("* reconnecting in {:.1}s (attempt {attempt})", delay.as_secs_f32());
            }
            Event::Connected => tracing::debug!("live stream open"),
            Event::Feed(n) => self.feed(n),
            Event::AuthFailed { reason } => {
                eprintln!("* session rejected ({reason}); run `parley login` again");
                return Flow::Stop;
            }
            Event::Disconnected { reason } => {
                eprintln!("* {reason}");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn feed(&mut self, notification: FeedNotification) {
        let decision = self.follower.observe(&notification, &self.username, !self.paused);
        match (decision, notification) {
            (_, FeedNotification::Reset(view)) => {
                self.buffered.clear();
                self.follower.acknowledge();
                eprintln!("* {} entries in history", view.len());
                for entry in view.iter() {
                    println!("{}", render(entry, &self.endpoint));
                }
            }
            (ViewportDecision::AutoAdvance, FeedNotification::EntriesAppended(entries)) => {
                // Own message while paused jumps back to the bottom.
                self.paused = false;
                self.catch_up();
                for entry in &entries {
                    println!("{}", render(entry, &self.endpoint));
                }
            }
            (ViewportDecision::ShowIndicator, FeedNotification::EntriesAppended(entries)) => {
                self.buffered.extend(entries);
                eprintln!("* {} new, /follow to show", self.follower.unseen());
            }
            (ViewportDecision::NoOp, _) => {}
        }
    }

    fn catch_up(&mut self) {
        for entry in self.buffered.drain(..) {
            println!("{}", render(&entry, &self.endpoint));
        }
        self.follower.acknowledge();
    }
}

/// One feed entry as a terminal line.
pub(crate) fn render(entry: &FeedEntry, endpoint: &Endpoint) -> String {
    let time = entry.timestamp.with_timezone(&Local).format("%H:%M");
    match entry.kind {
        EntryKind::Chat => format!(
            "[{time}] {}: {}",
            entry.author,
            entry.text.as_deref().unwrap_or_default()
        ),
        EntryKind::System => format!("[{time}] * {}", entry.text.as_deref().unwrap_or_default()),
        EntryKind::File => {
            let (name, url) = entry
                .attachment
                .as_ref()
                .map(|a| (a.filename.as_str(), a.url.as_str()))
                .unwrap_or(("file", ""));
            let url = if url.starts_with('/') {
                endpoint.http_url(url)
            } else {
                url.to_string()
            };
            format!("[{time}] {} shared {name} <{url}>", entry.author)
        }
    }
}
