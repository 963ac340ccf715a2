//! # parlor
//!
//! Terminal chat with a listing agent (or a buyer, from the agent's side).
//!
//! Opens one conversation, prints it, and sends every line typed on stdin.
//! `/refresh` re-fetches the conversation, `/quit` leaves.

mod config;
mod events;
mod input;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use parlor_chat::{ChatError, IdentityHandle, LocalIdentity, SessionDriver};
use parlor_net::{EnvToken, LiveConfig, RestClient, WsLiveChannel};
use parlor_shared::constants::APP_NAME;
use parlor_shared::transport::{ChatApi, LiveChannel, TokenSource};
use parlor_shared::types::{ChatId, UserId};

use crate::config::ClientConfig;
use crate::events::{format_notice, Transcript};

/// Delay between attempts to look up the signed-in user.
const IDENTITY_RETRY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Chat about a listing from the terminal.")]
struct Args {
    /// User id of the agent or buyer to chat with
    counterpart: String,

    /// Open a known conversation directly instead of resolving it
    #[arg(long, value_name = "ID")]
    chat_id: Option<String>,

    /// Do not use the live channel; rely on polling only
    #[arg(long)]
    no_live: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,parlor_client=info,parlor_chat=debug,parlor_net=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting {APP_NAME} v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let session_config = config.session_config();
    if let Err(e) = session_config.validate() {
        bail!("invalid session configuration: {e}");
    }

    let counterpart = UserId::parse(args.counterpart.as_str()).context("counterpart id is empty")?;
    let chat_id = args.chat_id.and_then(ChatId::parse);

    // -----------------------------------------------------------------------
    // 3. Transports
    // -----------------------------------------------------------------------
    let tokens: Arc<dyn TokenSource> = Arc::new(EnvToken::default());
    if tokens.bearer_token().is_none() {
        warn!("PARLOR_TOKEN is not set; requests will be refused until you sign in");
    }

    let api = Arc::new(
        RestClient::new(&config.api_url, tokens.clone(), config.request_timeout)
            .context("failed to build REST client")?,
    );

    let live = match (&config.ws_url, args.no_live) {
        (Some(url), false) => {
            let live_config = LiveConfig::new(url).context("invalid PARLOR_WS_URL")?;
            Some(Arc::new(WsLiveChannel::spawn(live_config, tokens.clone())))
        }
        _ => {
            info!("Live channel disabled, polling only");
            None
        }
    };

    // -----------------------------------------------------------------------
    // 4. Identity
    // -----------------------------------------------------------------------
    let identity = IdentityHandle::new(LocalIdentity::from(config.user_id.clone()));
    if !identity.current().is_resolved() {
        tokio::spawn(resolve_identity(api.clone(), identity.clone()));
    }

    // -----------------------------------------------------------------------
    // 5. Open the conversation (blocks until resolved or failed)
    // -----------------------------------------------------------------------
    let driver = SessionDriver::new(
        api.clone(),
        live.clone().map(|l| l as Arc<dyn LiveChannel>),
        session_config,
    );

    let mut handle = match driver.open(counterpart.clone(), chat_id, identity.subscribe()).await {
        Ok(handle) => handle,
        Err(ChatError::NotAuthenticated) => bail!("not signed in: set PARLOR_TOKEN and try again"),
        Err(e) => return Err(e).context("could not open the conversation"),
    };

    let opened = handle.view();
    println!(
        "-- chat {} with {} --",
        opened.chat_id.as_ref().map(ChatId::as_str).unwrap_or("?"),
        counterpart
    );

    let mut views = handle.subscribe_view();
    let printer = tokio::spawn(async move {
        let mut transcript = Transcript::new();
        loop {
            let view = views.borrow_and_update().clone();
            for line in transcript.update(&view) {
                println!("{line}");
            }
            if views.changed().await.is_err() {
                break;
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. Input loop
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let ControlFlow::Break(()) = input::forward(&handle, &line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            notice = handle.next_notice() => match notice {
                Some(notice) => println!("{}", format_notice(&notice)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    handle.close().await;
    printer.abort();
    if let Some(live) = live {
        live.shutdown();
    }
    Ok(())
}

/// Look up the signed-in user until it succeeds or the token is rejected.
async fn resolve_identity(api: Arc<RestClient>, identity: IdentityHandle) {
    loop {
        match api.current_user().await {
            Ok(user_id) => {
                info!(user_id = %user_id, "Signed-in user resolved");
                identity.resolve(user_id);
                return;
            }
            Err(e) if e.is_auth() => {
                warn!("Cannot look up the signed-in user without a valid token");
                return;
            }
            Err(e) => {
                debug!(error = %e, "User lookup failed, retrying");
                tokio::time::sleep(IDENTITY_RETRY).await;
            }
        }
    }
}
