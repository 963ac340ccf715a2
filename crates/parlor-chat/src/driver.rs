//! Async driver for one open conversation.
//!
//! The session task owns the [`ChatSession`] and is the only place it is
//! mutated. Callers talk to it through a [`SessionHandle`]: commands go in on
//! an mpsc channel, view snapshots come out on a `watch` channel and
//! user-facing notices on a second mpsc channel. Transport calls run in
//! spawned tasks and report back as epoch-tagged completions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use parlor_shared::error::TransportError;
use parlor_shared::protocol::{unwrap_message, ConversationSnapshot};
use parlor_shared::transport::{ChatApi, FetchTarget, LiveChannel};
use parlor_shared::types::{ChatId, MessageId, UserId};

use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::identity::LocalIdentity;
use crate::models::Message;
use crate::session::{ChatSession, Epoch, ResolveRequest, SessionView};

// ---------------------------------------------------------------------------
// Command / notice types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send the given compose-field text.
    Submit(String),
    /// Re-fetch the conversation.
    Refresh,
    /// Leave the screen.
    Close,
}

/// Notices sent *from* the session task for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A send failed; `draft` goes back into the compose field.
    SendFailed {
        message_id: MessageId,
        draft: String,
        error: ChatError,
    },
    /// A submit was refused before anything was sent.
    Rejected { text: String, error: ChatError },
    /// A manual refresh failed. The conversation stays usable.
    RefreshFailed(ChatError),
}

/// Results of transport calls, tagged with the epoch they were started under.
#[derive(Debug)]
enum Completion {
    Sent {
        epoch: Epoch,
        placeholder: MessageId,
        result: std::result::Result<Value, TransportError>,
    },
    /// No echo arrived for a frame the live channel accepted.
    LiveSendExpired { epoch: Epoch, placeholder: MessageId },
    Polled {
        epoch: Epoch,
        result: std::result::Result<ConversationSnapshot, TransportError>,
    },
    Refreshed {
        epoch: Epoch,
        result: std::result::Result<ConversationSnapshot, TransportError>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller side of an open conversation.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    notices: mpsc::Receiver<SessionNotice>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Submit(text.into())).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.send(SessionCommand::Refresh).await
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| ChatError::Closed)
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Next user-facing notice, or `None` once the session has stopped.
    pub async fn next_notice(&mut self) -> Option<SessionNotice> {
        self.notices.recv().await
    }

    /// Close the conversation and wait for the task to release the live room.
    pub async fn close(self) {
        let _ = self.commands.send(SessionCommand::Close).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Session task panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Opens conversations against a set of transports.
#[derive(Clone)]
pub struct SessionDriver {
    api: Arc<dyn ChatApi>,
    live: Option<Arc<dyn LiveChannel>>,
    config: SessionConfig,
}

impl SessionDriver {
    pub fn new(api: Arc<dyn ChatApi>, live: Option<Arc<dyn LiveChannel>>, config: SessionConfig) -> Self {
        Self { api, live, config }
    }

    /// Resolve the conversation with `counterpart` and start its session task.
    ///
    /// Resolution failure is returned as the blocking error; nothing is
    /// spawned in that case.
    pub async fn open(
        &self,
        counterpart: UserId,
        chat_id: Option<ChatId>,
        identity: watch::Receiver<LocalIdentity>,
    ) -> Result<SessionHandle> {
        let mut session = ChatSession::new(counterpart, chat_id, identity.borrow().clone());

        let request = session.begin_resolve()?;
        let epoch = request.epoch();
        let result = bounded(self.config.request_timeout, resolve(self.api.as_ref(), &request)).await;

        match result {
            Ok(snapshot) => {
                session.on_resolved(epoch, snapshot, Utc::now())?;
            }
            Err(e) => {
                return Err(session.on_resolve_failed(epoch, e).unwrap_or(ChatError::ConversationUnresolved));
            }
        }

        let live_rx = match (&self.live, session.chat_id()) {
            (Some(live), Some(chat_id)) => match live.subscribe(chat_id).await {
                Ok(rx) => Some(rx),
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Live subscription failed, relying on polling");
                    None
                }
            },
            _ => None,
        };

        let live_connected = self.live.as_ref().is_some_and(|l| l.is_connected());
        let (view_tx, view_rx) = watch::channel(session.view(live_connected));
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer);
        let (notice_tx, notice_rx) = mpsc::channel(self.config.notice_buffer);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            session,
            api: self.api.clone(),
            live: self.live.clone(),
            config: self.config.clone(),
            live_rx,
            identity,
            view_tx,
            notice_tx,
            done_tx,
            poll_in_flight: false,
        };
        let task = tokio::spawn(task.run(cmd_rx, done_rx));

        Ok(SessionHandle {
            commands: cmd_tx,
            view: view_rx,
            notices: notice_rx,
            task,
        })
    }
}

async fn resolve(
    api: &dyn ChatApi,
    request: &ResolveRequest,
) -> std::result::Result<ConversationSnapshot, TransportError> {
    match request {
        ResolveRequest::ResolveOrCreate { counterpart, .. } => api.resolve_or_create(counterpart).await,
        ResolveRequest::Fetch { target, .. } => api.fetch_conversation(target).await,
    }
}

/// Bound a transport call; expiry counts as [`TransportError::Timeout`].
async fn bounded<T, F>(limit: Duration, call: F) -> std::result::Result<T, TransportError>
where
    F: Future<Output = std::result::Result<T, TransportError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct SessionTask {
    session: ChatSession,
    api: Arc<dyn ChatApi>,
    live: Option<Arc<dyn LiveChannel>>,
    config: SessionConfig,
    live_rx: Option<mpsc::Receiver<Value>>,
    identity: watch::Receiver<LocalIdentity>,
    view_tx: watch::Sender<SessionView>,
    notice_tx: mpsc::Sender<SessionNotice>,
    done_tx: mpsc::UnboundedSender<Completion>,
    poll_in_flight: bool,
}

impl SessionTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut identity_open = true;
        let poll = sleep_until(self.next_poll_deadline());
        tokio::pin!(poll);

        info!(chat_id = ?self.session.chat_id().map(ChatId::as_str), "Session task started");

        loop {
            tokio::select! {
                // --- Caller commands ---
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Submit(text)) => self.handle_submit(text).await,
                    Some(SessionCommand::Refresh) => self.start_refresh(),
                    Some(SessionCommand::Close) | None => break,
                },

                // --- Live channel frames ---
                frame = next_frame(&mut self.live_rx) => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => {
                        warn!("Live subscription ended, relying on polling");
                        self.live_rx = None;
                    }
                },

                // --- Poll timer ---
                () = &mut poll => {
                    self.start_poll();
                    poll.as_mut().reset(self.next_poll_deadline());
                }

                // --- Transport completions ---
                Some(completion) = done.recv() => self.handle_completion(completion),

                // --- Identity changes ---
                changed = self.identity.changed(), if identity_open => match changed {
                    Ok(()) => {
                        let identity = self.identity.borrow_and_update().clone();
                        self.session.set_local_user(identity);
                    }
                    Err(_) => identity_open = false,
                },
            }

            self.publish_view();
        }

        self.shutdown().await;
    }

    fn next_poll_deadline(&self) -> Instant {
        let connected = self.live.as_ref().is_some_and(|l| l.is_connected());
        Instant::now() + self.config.effective_poll_interval(connected)
    }

    fn publish_view(&self) {
        let connected = self.live.as_ref().is_some_and(|l| l.is_connected());
        let next = self.session.view(connected);
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn notify(&self, notice: SessionNotice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            warn!(error = %e, "Dropping session notice");
        }
    }

    // -- Sending ------------------------------------------------------------

    async fn handle_submit(&mut self, text: String) {
        match self.session.submit(&text, Utc::now()) {
            Ok(placeholder) => self.dispatch(placeholder).await,
            Err(error) => {
                debug!(error = %error, "Submit rejected");
                self.notify(SessionNotice::Rejected { text, error });
            }
        }
    }

    /// Live channel first when it is up and accepts the frame, REST otherwise.
    async fn dispatch(&mut self, placeholder: Message) {
        let Some(chat_id) = self.session.chat_id().cloned() else {
            return;
        };
        let epoch = self.session.epoch();

        if let Some(live) = self.live.as_ref().filter(|l| l.is_connected()) {
            if live.send(&chat_id, &placeholder.text).await {
                debug!(message_id = %placeholder.id, "Sent over live channel");
                let done = self.done_tx.clone();
                let limit = self.config.request_timeout;
                let id = placeholder.id;
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    let _ = done.send(Completion::LiveSendExpired { epoch, placeholder: id });
                });
                return;
            }
            debug!(message_id = %placeholder.id, "Live channel refused frame, using REST");
        }

        let api = self.api.clone();
        let done = self.done_tx.clone();
        let limit = self.config.request_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, api.send_message(&chat_id, &placeholder.text)).await;
            let _ = done.send(Completion::Sent {
                epoch,
                placeholder: placeholder.id,
                result,
            });
        });
    }

    fn handle_send_failure(&mut self, epoch: Epoch, placeholder: MessageId, error: ChatError) {
        if let Some(draft) = self.session.on_send_failed(epoch, &placeholder) {
            self.notify(SessionNotice::SendFailed {
                message_id: placeholder,
                draft,
                error,
            });
        }
    }

    // -- Receiving ----------------------------------------------------------

    fn handle_frame(&mut self, frame: &Value) {
        match self.session.on_live_event(frame, Utc::now()) {
            Ok(report) if report.changed() => {
                debug!(appended = report.appended, replaced = report.replaced.len(), "Live event merged");
            }
            Ok(_) => {}
            Err(ChatError::AmbiguousRouting) => debug!("Live event for another conversation dropped"),
            Err(e) => debug!(error = %e, "Live event dropped"),
        }
    }

    fn start_poll(&mut self) {
        if self.poll_in_flight {
            return;
        }
        let Some(chat_id) = self.session.chat_id().cloned() else {
            return;
        };
        self.poll_in_flight = true;

        let epoch = self.session.epoch();
        let api = self.api.clone();
        let done = self.done_tx.clone();
        let limit = self.config.request_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, api.fetch_conversation(&FetchTarget::Chat(chat_id))).await;
            let _ = done.send(Completion::Polled { epoch, result });
        });
    }

    fn start_refresh(&mut self) {
        let request = match self.session.begin_refresh() {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Refresh ignored");
                return;
            }
        };

        let api = self.api.clone();
        let done = self.done_tx.clone();
        let limit = self.config.request_timeout;
        tokio::spawn(async move {
            let epoch = request.epoch();
            let result = bounded(limit, resolve(api.as_ref(), &request)).await;
            let _ = done.send(Completion::Refreshed { epoch, result });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        let now = Utc::now();
        match completion {
            Completion::Sent { epoch, placeholder, result: Ok(body) } => {
                self.session.on_send_confirmed(epoch, &placeholder, unwrap_message(&body), now);
            }
            Completion::Sent { epoch, placeholder, result: Err(e) } => {
                self.handle_send_failure(epoch, placeholder, e.into());
            }
            Completion::LiveSendExpired { epoch, placeholder } => {
                self.handle_send_failure(epoch, placeholder, ChatError::TransportFailure(TransportError::Timeout));
            }
            Completion::Polled { epoch, result } => {
                self.poll_in_flight = false;
                match result {
                    Ok(snapshot) => {
                        if let Some(report) = self.session.on_snapshot(epoch, &snapshot, now) {
                            if report.changed() {
                                debug!(appended = report.appended, replaced = report.replaced.len(), "Poll merged");
                            }
                        }
                    }
                    Err(e) => self.session.on_poll_failed(epoch, &e),
                }
            }
            Completion::Refreshed { epoch, result: Ok(snapshot) } => {
                if let Err(e) = self.session.on_resolved(epoch, snapshot, now) {
                    self.notify(SessionNotice::RefreshFailed(e));
                }
            }
            Completion::Refreshed { epoch, result: Err(e) } => {
                if let Some(error) = self.session.on_resolve_failed(epoch, e) {
                    self.notify(SessionNotice::RefreshFailed(error));
                }
            }
        }
    }

    async fn shutdown(mut self) {
        if let Some(chat_id) = self.session.close() {
            if let Some(live) = &self.live {
                live.unsubscribe(&chat_id).await;
            }
        }
        self.live_rx = None;
        self.publish_view();
        info!("Session task stopped");
    }
}

/// Next frame from the live subscription; pends forever without one.
async fn next_frame(rx: &mut Option<mpsc::Receiver<Value>>) -> Option<Value> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
