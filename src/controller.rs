//! Session controller: the single task that owns a voice session.
//!
//! Every piece of mutable session state (lifecycle, channel, capture loop,
//! playback scheduler, pending decodes) lives on this task. Commands arrive
//! from [`SessionHandle`]s, everything else arrives on the session's event
//! queue, and the outside world only sees [`SessionStatus`] through a watch
//! channel.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::codec::{FrameDecoder, FrameEncoder};
use crate::audio::decode_queue::{DecodeQueue, DecodeResult};
use crate::audio::device::{AudioBackend, CaptureDevice, OutputDevice};
use crate::audio::record::CaptureLoop;
use crate::audio::scheduler::PlaybackScheduler;
use crate::channel::{ChannelConnector, ChannelEvent, ConnectRequest, SessionChannel};
use crate::config::Config;
use crate::error::SessionError;
use crate::event::{EventReceiver, EventSender, SessionEvent, event_queue};
use crate::protocol::{SessionContext, build_system_instruction};
use crate::state_machine::{SessionState, SessionStatus};
use crate::stats::{SessionStats, StatsSnapshot};

type StartReply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Start {
        ctx: SessionContext,
        reply: StartReply,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable front end of a [`SessionController`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    stats: Arc<SessionStats>,
}

impl SessionHandle {
    /// Start a session and wait until the endpoint accepts it.
    ///
    /// Fails with `AlreadyActive` if a session is connecting or open, and
    /// with `Cancelled` if `stop()` is called before the channel opens.
    pub async fn start(&self, ctx: SessionContext) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { ctx, reply })
            .await
            .map_err(|_| SessionError::Cancelled)?;
        rx.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Tear the session down. Safe to call at any time, any number of
    /// times; returns once every device is released.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that wakes on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// RMS level of the latest captured frame.
    pub fn input_level(&self) -> f32 {
        self.stats.input_level()
    }
}

/// Devices and channel acquired while connecting.
struct Acquired {
    input: Box<dyn CaptureDevice>,
    output: Box<dyn OutputDevice>,
    channel: SessionChannel,
}

struct PendingStart {
    task: JoinHandle<Result<Acquired, SessionError>>,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

/// Resources held while a session is connecting or open.
struct Session {
    channel: SessionChannel,
    capture: Option<CaptureLoop>,
    scheduler: PlaybackScheduler,
    decodes: DecodeQueue,
    events: EventReceiver,
}

enum Wake {
    Event(SessionEvent),
    Decoded(DecodeResult),
}

pub struct SessionController {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    stats: Arc<SessionStats>,
    session_id: Option<Uuid>,
    start_reply: Option<StartReply>,
    pending: Option<PendingStart>,
    session: Option<Session>,
}

impl SessionController {
    /// Spawn the controller task and return a handle to it.
    ///
    /// The task ends, tearing down any live session, once every handle has
    /// been dropped.
    pub fn spawn(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn ChannelConnector>,
    ) -> SessionHandle {
        let (commands_tx, commands) = mpsc::channel(16);
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let stats = Arc::new(SessionStats::new());

        let controller = SessionController {
            config,
            backend,
            connector,
            commands,
            status_tx,
            stats: stats.clone(),
            session_id: None,
            start_reply: None,
            pending: None,
            session: None,
        };
        tokio::spawn(controller.run());

        SessionHandle {
            commands: commands_tx,
            status,
            stats,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Start { ctx, reply }) => self.handle_start(ctx, reply).await,
                    Some(Command::Stop { reply }) => {
                        self.handle_stop().await;
                        let _ = reply.send(());
                    }
                    None => break,
                },
                acquired = wait_acquired(&mut self.pending) => self.on_acquired(acquired).await,
                wake = next_wake(&mut self.session) => match wake {
                    Wake::Event(event) => self.handle_event(event).await,
                    Wake::Decoded(result) => self.on_decoded(result).await,
                },
            }
        }

        if self.state().is_active() {
            self.handle_stop().await;
        }
        log::info!("Session controller exiting");
    }

    fn state(&self) -> SessionState {
        self.status_tx.borrow().state
    }

    fn tag(&self) -> String {
        self.session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    /// Apply `f` to the published status; subscribers wake only on change.
    fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.status_tx.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        });
    }

    fn transition(&self, next: SessionState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            log::warn!("[{}] Ignoring transition {} -> {}", self.tag(), current, next);
            return;
        }
        if current != next {
            log::info!("[{}] {} -> {}", self.tag(), current, next);
        }
        self.update(|s| s.state = next);
    }

    // ======================== Commands ========================

    async fn handle_start(&mut self, ctx: SessionContext, reply: StartReply) {
        if self.state().is_active() {
            let _ = reply.send(Err(SessionError::AlreadyActive));
            return;
        }

        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.stats.reset();
        self.update(|s| s.last_error = None);
        self.transition(SessionState::Connecting);
        self.start_reply = Some(reply);

        let Some(api_key) = self.config.credential().map(str::to_string) else {
            self.fail(SessionError::Credential).await;
            return;
        };

        let request = ConnectRequest {
            model: self.config.model.to_string(),
            voice: self.config.voice.to_string(),
            system_instruction: build_system_instruction(&self.config, &ctx),
            api_key,
        };
        log::info!(
            "[{}] Starting session for {}",
            session_id,
            ctx.display_name.as_deref().unwrap_or("anonymous user")
        );

        let (events_tx, events_rx) = event_queue();
        let task = tokio::spawn(acquire(
            self.backend.clone(),
            self.connector.clone(),
            self.config.clone(),
            request,
            events_tx.clone(),
        ));
        self.pending = Some(PendingStart {
            task,
            events_tx,
            events_rx,
        });
    }

    async fn handle_stop(&mut self) {
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Err(SessionError::Cancelled));
        }
        self.teardown().await;
        self.transition(SessionState::Closed);
        self.update(|s| {
            s.connected = false;
            s.speaking = false;
        });
    }

    // ======================== Lifecycle ========================

    async fn on_acquired(&mut self, acquired: Result<Acquired, SessionError>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let acquired = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        let capture = CaptureLoop::start(
            acquired.input,
            self.config.frame_size,
            FrameEncoder::new(self.config.input_sample_rate),
            acquired.channel.gate(),
            self.stats.clone(),
            pending.events_tx,
        );

        self.session = Some(Session {
            channel: acquired.channel,
            capture: None,
            scheduler: PlaybackScheduler::new(acquired.output),
            decodes: DecodeQueue::new(FrameDecoder::new(self.config.output_sample_rate)),
            events: pending.events_rx,
        });

        match capture {
            Ok(capture) => {
                if let Some(session) = self.session.as_mut() {
                    session.capture = Some(capture);
                }
                log::info!("[{}] Channel connected, waiting for setup", self.tag());
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(event) => self.handle_channel_event(event).await,
            SessionEvent::SourceEnded(id) => {
                let drained = self
                    .session
                    .as_mut()
                    .is_some_and(|s| s.scheduler.source_ended(id));
                if drained {
                    log::debug!("[{}] Playback drained", self.tag());
                    self.update(|s| s.speaking = false);
                }
            }
            SessionEvent::DeviceFailed(e) => self.fail(e).await,
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        let state = self.state();
        match event {
            ChannelEvent::Opened => {
                if state != SessionState::Connecting {
                    return;
                }
                if let Some(session) = self.session.as_ref() {
                    session.channel.mark_ready();
                }
                self.transition(SessionState::Open);
                self.update(|s| s.connected = true);
                log::info!("[{}] Session open", self.tag());
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            ChannelEvent::InboundDelta(data) => {
                if let Some(session) = self.session.as_mut() {
                    session.decodes.submit(data);
                }
            }
            ChannelEvent::Interrupted => self.on_interrupted(),
            ChannelEvent::Closed(reason) => {
                if state == SessionState::Connecting {
                    let reason = reason.unwrap_or_else(|| "closed during handshake".to_string());
                    self.fail(SessionError::Transport(reason)).await;
                } else {
                    log::info!("[{}] Endpoint closed the session: {:?}", self.tag(), reason);
                    self.handle_stop().await;
                }
            }
            ChannelEvent::Error(reason) => {
                log::error!("[{}] Channel error: {}", self.tag(), reason);
                self.fail(SessionError::Transport(reason)).await;
            }
        }
    }

    /// Barge-in: nothing queued before this point may reach the speaker.
    fn on_interrupted(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let discarded = session.decodes.clear();
        self.stats.record_discarded(discarded);
        let stopped = session.scheduler.immediate_stop();
        log::info!(
            "[{}] Interrupted: stopped {} sources, discarded {} pending decodes",
            self.tag(),
            stopped,
            discarded
        );
        self.update(|s| s.speaking = false);
    }

    async fn on_decoded(&mut self, result: DecodeResult) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.record_malformed();
                log::warn!("[{}] Dropping inbound chunk: {}", self.tag(), e);
                return;
            }
        };
        match session.scheduler.schedule(chunk) {
            Ok(_) => {
                self.stats.record_scheduled();
                self.update(|s| s.speaking = true);
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Fatal error: clean up first, then report `Errored`.
    async fn fail(&mut self, error: SessionError) {
        log::error!("[{}] Session failed: {}", self.tag(), error);
        self.teardown().await;
        self.transition(SessionState::Errored);
        self.update(|s| {
            s.connected = false;
            s.speaking = false;
            s.last_error = Some(error.user_message());
        });
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    /// Release everything the session holds. Idempotent.
    async fn teardown(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            // Wait for the aborted task so any device it opened is dropped.
            let _ = pending.task.await;
        }

        let Some(mut session) = self.session.take() else {
            return;
        };
        session.channel.close();
        self.stats.record_discarded(session.decodes.clear());

        let capture = session.capture.take();
        let mut scheduler = session.scheduler;
        let released = tokio::task::spawn_blocking(move || {
            if let Some(mut capture) = capture {
                capture.stop();
            }
            scheduler.close();
        })
        .await;
        if let Err(e) = released {
            log::error!("[{}] Device release task failed: {}", self.tag(), e);
        }
        log::info!("[{}] Session resources released", self.tag());
    }
}

/// Open both devices, then the channel. Dropping this future releases
/// whatever it had opened so far.
async fn acquire(
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    config: Config,
    request: ConnectRequest,
    events: EventSender,
) -> Result<Acquired, SessionError> {
    let input = {
        let backend = backend.clone();
        let (rate, frame_size) = (config.input_sample_rate, config.frame_size);
        tokio::task::spawn_blocking(move || backend.open_input(rate, frame_size))
            .await
            .map_err(|e| SessionError::Device(format!("input open task failed: {}", e)))??
    };
    let output = {
        let events = events.clone();
        let rate = config.output_sample_rate;
        tokio::task::spawn_blocking(move || backend.open_output(rate, events))
            .await
            .map_err(|e| SessionError::Device(format!("output open task failed: {}", e)))??
    };
    let channel = connector.connect(request, events).await?;
    Ok(Acquired {
        input,
        output,
        channel,
    })
}

async fn wait_acquired(slot: &mut Option<PendingStart>) -> Result<Acquired, SessionError> {
    let Some(start) = slot.as_mut() else {
        return pending().await;
    };
    match (&mut start.task).await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(SessionError::Cancelled),
        Err(e) => Err(SessionError::Transport(format!("connect task failed: {}", e))),
    }
}

/// Next thing the live session needs to react to. Events win over decode
/// results so an interruption lands before any chunk decoded ahead of it.
async fn next_wake(session: &mut Option<Session>) -> Wake {
    let Some(session) = session.as_mut() else {
        return pending().await;
    };
    let decodes_idle = session.decodes.is_empty();
    tokio::select! {
        biased;
        event = session.events.recv() => match event {
            Some(event) => Wake::Event(event),
            None => pending().await,
        },
        result = session.decodes.next(), if !decodes_idle => match result {
            Some(result) => Wake::Decoded(result),
            None => pending().await,
        },
    }
}
