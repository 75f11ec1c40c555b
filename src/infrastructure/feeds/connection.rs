//! Upstream Connection Loop
//!
//! One connection task per feed. The task owns the WebSocket, applies
//! backoff on failure, and keeps the subscription table authoritative:
//! on every successful connect it replays the feed's active topics, so a
//! reconnect restores exactly what downstream clients still watch.
//!
//! Commands arriving while the socket is down are parked in a bounded
//! pending queue. On reconnect the replay covers every topic the table
//! still holds, so parked commands for replayed topics are dropped
//! instead of flushed; only commands the replay cannot express (for
//! topics no longer in the table) are sent ahead of it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedCommand, FeedHandle};
use crate::domain::subscription::{StreamTopic, SubscriptionTable};
use crate::domain::symbol::FeedClass;
use crate::domain::tick::Tick;

use super::heartbeat::Liveness;
use super::protocol::FeedProtocol;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};

/// How often a feed outside its operating window rechecks the calendar.
const WINDOW_RECHECK: Duration = Duration::from_secs(3600);

// ===== Error Type =====

/// Errors terminating one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No pong within the configured timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Upstream closed the stream.
    #[error("stream closed by upstream")]
    StreamClosed,
}

// ===== Connection Events =====

/// Lifecycle and data events emitted by a connection task.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connection established and subscriptions replayed.
    Connected {
        /// Feed that connected.
        feed: FeedClass,
    },
    /// Connection lost; a reconnect may follow.
    Disconnected {
        /// Feed that dropped.
        feed: FeedClass,
    },
    /// Backoff delay started before the given attempt.
    Reconnecting {
        /// Feed being reconnected.
        feed: FeedClass,
        /// Attempt number within the current outage.
        attempt: u32,
    },
    /// Attempt budget spent; the feed stays down until restart.
    Unavailable {
        /// Feed that gave up.
        feed: FeedClass,
    },
    /// Normalized inbound update.
    Tick(Tick),
}

/// Lifecycle phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; idle, backing off, or outside the operating window.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Socket established, commands flow directly.
    Open,
}

// ===== Pending Queue =====

/// Bounded FIFO of commands awaiting a connection.
///
/// At capacity the oldest command is dropped; the replay on the next
/// successful connect restores any subscription lost that way.
#[derive(Debug)]
pub struct PendingQueue {
    commands: VecDeque<FeedCommand>,
    cap: usize,
}

impl PendingQueue {
    /// Create a queue holding at most `cap` commands.
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self {
            commands: VecDeque::new(),
            cap,
        }
    }

    /// Park a command, evicting the oldest when full.
    pub fn push(&mut self, command: FeedCommand) {
        if self.commands.len() >= self.cap {
            tracing::error!(cap = self.cap, "pending queue full, dropping oldest command");
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }

    /// Take all parked commands in arrival order.
    pub fn drain(&mut self) -> Vec<FeedCommand> {
        self.commands.drain(..).collect()
    }

    /// Number of parked commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ===== Connection Settings =====

/// Tunables for one connection task.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Backoff parameters.
    pub reconnect: ReconnectConfig,
    /// Maximum commands parked while disconnected.
    pub pending_queue_cap: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            pending_queue_cap: 256,
        }
    }
}

// ===== Upstream Connection =====

/// Connection task for one upstream feed.
pub struct UpstreamConnection<P> {
    protocol: P,
    settings: ConnectionSettings,
    table: Arc<SubscriptionTable>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    state: ConnectionState,
    pending: PendingQueue,
}

impl<P: FeedProtocol> UpstreamConnection<P> {
    /// Create a connection task and the handle the router sends through.
    #[must_use]
    pub fn new(
        protocol: P,
        settings: ConnectionSettings,
        table: Arc<SubscriptionTable>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> (Self, FeedHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let feed = protocol.feed();
        let pending = PendingQueue::new(settings.pending_queue_cap);
        let connection = Self {
            protocol,
            settings,
            table,
            commands: command_rx,
            events,
            cancel,
            state: ConnectionState::Disconnected,
            pending,
        };
        (connection, FeedHandle::new(feed, command_tx))
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until cancelled or the attempt budget is spent.
    pub async fn run(mut self) {
        let feed = self.protocol.feed();
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(%feed, "connection task cancelled");
                return;
            }

            if self.wait_for_operating_window().await.is_err() {
                return;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!(%feed, "connection closed gracefully");
                    return;
                }
                Err(e) => {
                    tracing::warn!(%feed, error = %e, "connection error");
                    self.state = ConnectionState::Disconnected;
                    let _ = self.events.send(FeedEvent::Disconnected { feed }).await;

                    if let Some(delay) = policy.next_delay() {
                        let attempt = policy.attempt_count();
                        tracing::info!(
                            %feed,
                            attempt,
                            delay_ms = delay.as_millis(),
                            "reconnecting to feed"
                        );
                        let _ = self
                            .events
                            .send(FeedEvent::Reconnecting { feed, attempt })
                            .await;

                        if self.idle_wait(delay).await.is_err() {
                            return;
                        }
                    } else {
                        tracing::error!(%feed, "reconnect attempts exhausted, feed unavailable");
                        let _ = self.events.send(FeedEvent::Unavailable { feed }).await;
                        return;
                    }
                }
            }
        }
    }

    /// Defer connecting until the feed's market is open. Errors on cancel.
    async fn wait_for_operating_window(&mut self) -> Result<(), ()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(());
            }
            let today = chrono::Utc::now().weekday();
            if self.protocol.operates_on(today) {
                return Ok(());
            }
            tracing::info!(
                feed = %self.protocol.feed(),
                %today,
                "outside operating window, deferring connection"
            );
            self.idle_wait(WINDOW_RECHECK).await?;
        }
    }

    /// Sleep while parking any commands that arrive. Errors on cancel or
    /// when the command channel closes.
    async fn idle_wait(&mut self, delay: Duration) -> Result<(), ()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(()),
                () = &mut sleep => return Ok(()),
                command = self.commands.recv() => match command {
                    Some(command) => self.pending.push(command),
                    None => return Err(()),
                },
            }
        }
    }

    /// Connect and pump frames until an error or cancellation.
    async fn connect_and_run(&mut self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        let feed = self.protocol.feed();
        self.state = ConnectionState::Connecting;
        tracing::info!(%feed, "connecting to feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.protocol.url()).await?;
        let (mut write, mut read) = ws_stream.split();

        self.state = ConnectionState::Open;
        policy.reset();
        let _ = self.events.send(FeedEvent::Connected { feed }).await;

        // Commands that raced the connect are still sitting in the channel;
        // park them so the dedup below sees them too.
        while let Ok(command) = self.commands.try_recv() {
            self.pending.push(command);
        }

        // The replay restores every topic the table still holds, which
        // subsumes any parked command for those topics; flushing them too
        // would double-subscribe (or wrongly close a watched stream). Only
        // commands the replay cannot express go out, ahead of it.
        let topics = self.table.active_topics(feed);
        for command in self.pending.drain() {
            if covered_by_replay(&command, &topics) {
                continue;
            }
            let frame = frame_for(&self.protocol, &command);
            write.send(Message::Text(frame.into())).await?;
        }
        if !topics.is_empty() {
            tracing::info!(%feed, count = topics.len(), "replaying active subscriptions");
        }
        for topic in topics {
            let frame = self.protocol.subscribe_frame(&topic);
            write.send(Message::Text(frame.into())).await?;
        }

        // Ping on our own timer for feeds that need it; the disabled arm
        // below is never polled when the protocol has no heartbeat.
        let heartbeat = self.protocol.heartbeat();
        let period = heartbeat
            .as_ref()
            .map_or(WINDOW_RECHECK, |config| config.ping_interval);
        let mut ping_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut liveness = Liveness::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(());
                }
                _ = ping_timer.tick(), if heartbeat.is_some() => {
                    if let Some(config) = &heartbeat {
                        if liveness.is_stale(config.pong_timeout) {
                            tracing::warn!(
                                %feed,
                                timeout_secs = config.pong_timeout.as_secs(),
                                "heartbeat timeout"
                            );
                            return Err(FeedError::HeartbeatTimeout);
                        }
                        liveness.note_ping();
                        write.send(Message::Ping(vec![].into())).await?;
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            let frame = frame_for(&self.protocol, &command);
                            write.send(Message::Text(frame.into())).await?;
                        }
                        None => {
                            tracing::debug!(%feed, "command channel closed, shutting down");
                            return Ok(());
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            liveness.record_activity();
                            for tick in self.protocol.parse(&text) {
                                let _ = self.events.send(FeedEvent::Tick(tick)).await;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            liveness.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(%feed, "upstream sent close frame");
                            return Err(FeedError::StreamClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!(%feed, "stream ended");
                            return Err(FeedError::StreamClosed);
                        }
                    }
                }
            }
        }
    }
}

fn frame_for<P: FeedProtocol>(protocol: &P, command: &FeedCommand) -> String {
    match command {
        FeedCommand::Subscribe(topic) => protocol.subscribe_frame(topic),
        FeedCommand::Unsubscribe(topic) => protocol.unsubscribe_frame(topic),
    }
}

fn covered_by_replay(command: &FeedCommand, replay: &[StreamTopic]) -> bool {
    let (FeedCommand::Subscribe(topic) | FeedCommand::Unsubscribe(topic)) = command;
    replay.contains(topic)
}
