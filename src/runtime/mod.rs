//! Streaming runtime actor and schema facade.
//!
//! Runtime command/event types live in `schema`, while this module hosts the
//! actor that owns the current session and turns coordinator activity into an
//! ordered event stream.

use crate::model::{ProbeSession, SessionChange, SessionState};
use crate::service::ProbeService;
use tokio::sync::mpsc;
use tracing::debug;

mod schema;
mod tasks;

pub use schema::*;
use tasks::{spawn_request_watcher, ActiveRequest, RequestUpdate};

/// Handle for sending commands to a spawned runtime actor.
#[derive(Clone)]
pub struct ProbeRuntimeHandle {
    pub commands: mpsc::Sender<RuntimeCommand>,
}

impl ProbeRuntimeHandle {
    /// Send one command to the runtime actor.
    pub async fn send(&self, command: RuntimeCommand) -> Result<(), String> {
        self.commands
            .send(command)
            .await
            .map_err(|_| "runtime command channel closed".to_string())
    }
}

/// Event stream receiver returned by [`spawn_runtime`].
pub type RuntimeEventStream = mpsc::UnboundedReceiver<RuntimeEventEnvelope>;

/// Spawn a runtime actor driving `service`.
pub fn spawn_runtime(service: ProbeService) -> (ProbeRuntimeHandle, RuntimeEventStream) {
    let (command_tx, mut command_rx) = mpsc::channel::<RuntimeCommand>(64);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RuntimeEventEnvelope>();

    tokio::spawn(async move {
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<RequestUpdate>();
        let mut seq: u64 = 0;
        let mut state = RuntimeActorState {
            service,
            session: None,
            changes: None,
            active: None,
            last_revision: 0,
        };

        emit_event(
            &event_tx,
            &mut seq,
            RuntimeEvent::Lifecycle(LifecycleEvent::RuntimeStarted),
        );

        loop {
            tokio::select! {
                // Session snapshots drain before request updates, so progress
                // is always reported ahead of the request settling.
                biased;
                Some(change) = async {
                    match state.changes.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => None,
                    }
                } => {
                    handle_session_change(change, &mut state, &event_tx, &mut seq);
                }
                Some(update) = updates_rx.recv() => {
                    match update {
                        RequestUpdate::Created(request) => emit_event(
                            &event_tx,
                            &mut seq,
                            RuntimeEvent::Request(RequestEvent::ResponseCreated { request }),
                        ),
                        RequestUpdate::Settled(request, outcome) => {
                            if state.active.as_ref().is_some_and(|active| active.request == request) {
                                state.active = None;
                            }
                            emit_event(
                                &event_tx,
                                &mut seq,
                                RuntimeEvent::Request(RequestEvent::settled(request, outcome)),
                            );
                        }
                    }
                }
                Some(command) = command_rx.recv() => {
                    let mut command_ctx = RuntimeCommandContext {
                        state: &mut state,
                        event_tx: &event_tx,
                        seq: &mut seq,
                        updates_tx: &updates_tx,
                    };
                    let should_stop = handle_runtime_command(command, &mut command_ctx);
                    if should_stop {
                        emit_event(
                            &event_tx,
                            &mut seq,
                            RuntimeEvent::Lifecycle(LifecycleEvent::RuntimeStopped),
                        );
                        break;
                    }
                }
                else => break,
            }
        }
    });

    (
        ProbeRuntimeHandle {
            commands: command_tx,
        },
        event_rx,
    )
}

struct RuntimeActorState {
    service: ProbeService,
    session: Option<ProbeSession>,
    changes: Option<mpsc::UnboundedReceiver<SessionChange>>,
    active: Option<ActiveRequest>,
    last_revision: u64,
}

impl RuntimeActorState {
    fn install_session(&mut self, session: ProbeSession) {
        self.changes = Some(session.subscribe());
        self.last_revision = 0;
        self.session = Some(session);
    }

    fn drop_session(&mut self) -> Option<ProbeSession> {
        self.changes = None;
        self.session.take()
    }
}

fn emit_event(
    tx: &mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &mut u64,
    event: RuntimeEvent,
) {
    let _ = tx.send(RuntimeEventEnvelope::new(*seq, event));
    *seq = seq.saturating_add(1);
}

fn emit_error(
    tx: &mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &mut u64,
    request: Option<RequestRef>,
    message: impl Into<String>,
) {
    emit_event(
        tx,
        seq,
        RuntimeEvent::Error(ErrorEvent {
            request,
            message: message.into(),
        }),
    );
}

struct RuntimeCommandContext<'a> {
    state: &'a mut RuntimeActorState,
    event_tx: &'a mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &'a mut u64,
    updates_tx: &'a mpsc::UnboundedSender<RequestUpdate>,
}

fn handle_runtime_command(command: RuntimeCommand, ctx: &mut RuntimeCommandContext<'_>) -> bool {
    let state = &mut *ctx.state;
    let event_tx = ctx.event_tx;
    let seq = &mut *ctx.seq;

    match command {
        RuntimeCommand::StartSession => {
            start_session(state, event_tx, seq);
        }
        RuntimeCommand::Submit { prompt } => {
            if let Some(active) = state.active.as_ref() {
                emit_error(
                    event_tx,
                    seq,
                    Some(active.request.clone()),
                    "a request is already running",
                );
                return false;
            }
            // A session carries one exchange; later prompts get a fresh one.
            let session = match state.session.clone() {
                Some(session)
                    if !session.is_disposed() && session.state() == SessionState::Created =>
                {
                    session
                }
                _ => start_session(state, event_tx, seq),
            };

            let pending = match state.service.initiate(&session, prompt.as_str()) {
                Ok(pending) => pending,
                Err(err) => {
                    emit_error(event_tx, seq, None, err.to_string());
                    return false;
                }
            };
            let request = RequestRef {
                session_id: session.id().to_string(),
                request_seq: pending.request_seq(),
            };
            emit_event(
                event_tx,
                seq,
                RuntimeEvent::Request(RequestEvent::Issued {
                    request: request.clone(),
                    preview: truncate_preview(&prompt, 80),
                }),
            );
            state.active = Some(ActiveRequest {
                session_id: session.id().clone(),
                request: request.clone(),
            });
            spawn_request_watcher(request, pending, ctx.updates_tx.clone());
        }
        RuntimeCommand::Cancel => {
            let Some(active) = state.active.as_ref() else {
                emit_error(event_tx, seq, None, "no request is running");
                return false;
            };
            // The watcher reports the cancelled outcome once the exchange settles.
            if !state.service.cancel_current_request(&active.session_id) {
                debug!(session = %active.session_id, "request already settling");
            }
        }
        RuntimeCommand::Clear => {
            let Some(session) = state.drop_session() else {
                emit_error(event_tx, seq, None, "no session to clear");
                return false;
            };
            state.service.clear_session(session.id());
            emit_event(
                event_tx,
                seq,
                RuntimeEvent::Session(SessionEvent::Cleared {
                    session_id: session.id().to_string(),
                }),
            );
        }
        RuntimeCommand::SetFollowAlong { enabled } => {
            let Some(session) = state.session.as_ref() else {
                emit_error(event_tx, seq, None, "no active session");
                return false;
            };
            session.set_follow_along(enabled);
            emit_event(
                event_tx,
                seq,
                RuntimeEvent::Session(SessionEvent::FollowAlongChanged {
                    session_id: session.id().to_string(),
                    enabled,
                }),
            );
        }
        RuntimeCommand::Shutdown => {
            if let Some(active) = state.active.take() {
                state.service.cancel_current_request(&active.session_id);
            }
            return true;
        }
    }
    false
}

fn start_session(
    state: &mut RuntimeActorState,
    event_tx: &mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &mut u64,
) -> ProbeSession {
    let session = state.service.start_session();
    state.install_session(session.clone());
    emit_event(
        event_tx,
        seq,
        RuntimeEvent::Session(SessionEvent::Started {
            session_id: session.id().to_string(),
        }),
    );
    session
}

fn handle_session_change(
    change: SessionChange,
    state: &mut RuntimeActorState,
    event_tx: &mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &mut u64,
) {
    match change {
        SessionChange::Updated { revision, .. } => {
            // Several notifications may collapse into one snapshot.
            if revision <= state.last_revision {
                return;
            }
            let Some(session) = state.session.as_ref() else {
                return;
            };
            let view = session.view();
            state.last_revision = view.revision;
            emit_event(event_tx, seq, RuntimeEvent::Progress(ProgressUpdate { view }));
        }
        SessionChange::Disposed { session_id } => {
            debug!(session = %session_id, "session disposed");
            if state
                .session
                .as_ref()
                .is_some_and(|session| session.id() == &session_id)
            {
                state.drop_session();
            }
        }
    }
}

fn truncate_preview(text: &str, max_len: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max_len {
        return flat;
    }
    let prefix: String = flat.chars().take(max_len).collect();
    format!("{prefix}...")
}
