//! Presence and session coordinator
//!
//! One task owns the transport and every piece of session state. Callers talk
//! to it through a [`Coordinator`] handle that sends commands over a channel;
//! the transport reports into an event channel the same task drains. The task
//! waits on both channels plus the scheduler deadline, the presence grace
//! timer and a maintenance tick, so every mutation happens in one place.

use std::sync::Arc;

use beaconchat_core::{
    create_transport_event_channel, BeaconError, BroadcastTransport, DedupStats, Envelope,
    Fragment, Identity, MessageFragmenter, MessageId, Result, SystemTimeSource, TimeSource,
    TransportEvent, TransportEventReceiver, TransportEventSender,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::CoordinatorConfig;
use crate::listener::{dispatch, MessageListener};
use crate::nearby::{NearbyPeer, NearbyPeers};
use crate::pipeline::{PipelineOutcome, ReceivePipeline};
use crate::scheduler::{SequenceId, SequenceStep, TransmitScheduler};

// ----------------------------------------------------------------------------
// Public Types
// ----------------------------------------------------------------------------

/// How a send ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// Every fragment and the final repeat went out
    Completed,
    /// A newer send or presence took over the radio
    Superseded,
    /// The coordinator was stopped mid-sequence
    Cancelled,
    /// The transport became unusable mid-sequence
    Failed { reason: String },
}

/// Handle to a message being transmitted
#[derive(Debug)]
pub struct SendReceipt {
    message_id: MessageId,
    fragments: usize,
    outcome: oneshot::Receiver<SendOutcome>,
}

impl SendReceipt {
    /// Wire message id shared by the fragments
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Number of distinct fragments
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Wait for the sequence to end
    pub async fn outcome(self) -> SendOutcome {
        self.outcome.await.unwrap_or(SendOutcome::Cancelled)
    }
}

/// What the radio is currently carrying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransmitState {
    Idle,
    Presence,
    Message {
        message_id: MessageId,
        fragments: usize,
    },
}

/// Snapshot of the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub transport: String,
    pub transmit: TransmitState,
    pub listening: bool,
    pub identity: Option<Identity>,
    pub pending_reassemblies: usize,
    pub fragment_dedup: DedupStats,
    pub message_dedup: DedupStats,
    pub nearby_peers: usize,
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

enum Command {
    StartPresence {
        identity: Identity,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        identity: Identity,
        envelope: Envelope,
        reply: oneshot::Sender<Result<SendReceipt>>,
    },
    StartListening {
        listener: Box<dyn MessageListener>,
        reply: oneshot::Sender<Result<()>>,
    },
    StopListening {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Nearby {
        reply: oneshot::Sender<Vec<NearbyPeer>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Assembles a coordinator around a transport
pub struct CoordinatorBuilder {
    transport: Box<dyn BroadcastTransport>,
    config: CoordinatorConfig,
    time_source: Arc<dyn TimeSource>,
}

impl CoordinatorBuilder {
    pub fn new<T: BroadcastTransport + 'static>(transport: T) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn BroadcastTransport>) -> Self {
        Self {
            transport,
            config: CoordinatorConfig::default(),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for message ids and expiry
    pub fn with_time_source<S: TimeSource + 'static>(mut self, time_source: S) -> Self {
        self.time_source = Arc::new(time_source);
        self
    }

    /// Spawn the coordinator task on the current tokio runtime
    pub fn spawn(self) -> Result<Coordinator> {
        let Self {
            mut transport,
            config,
            time_source,
        } = self;

        config.validate()?;
        let fragmenter = MessageFragmenter::new(config.protocol.chunk_size)?;

        let (command_sender, command_receiver) = mpsc::channel(config.command_buffer_size);
        let (event_sender, event_receiver) = create_transport_event_channel(config.event_buffer_size);
        transport.attach_events(event_sender.clone());

        let max_wire = config.protocol.max_fragment_wire_len();
        if transport.max_payload_len() < max_wire {
            warn!(
                "Transport {} accepts {} bytes but fragments may reach {} bytes",
                transport.name(),
                transport.max_payload_len(),
                max_wire
            );
        }

        let task = CoordinatorTask {
            pipeline: ReceivePipeline::new(&config.protocol),
            nearby: NearbyPeers::new(config.nearby_ttl),
            config,
            transport,
            time_source,
            fragmenter,
            scheduler: TransmitScheduler::new(),
            listener: None,
            listening: false,
            identity: None,
            presence_identity: None,
            transmit: TransmitState::Idle,
            pending_send: None,
            presence_revert: None,
            commands: command_receiver,
            events: event_receiver,
            _event_sender: event_sender,
        };

        Ok(Coordinator {
            commands: command_sender,
            task: Some(tokio::spawn(task.run())),
        })
    }
}

// ----------------------------------------------------------------------------
// Coordinator Handle
// ----------------------------------------------------------------------------

/// Handle to a running coordinator task
///
/// Dropping the handle aborts the task; call [`shutdown`](Self::shutdown)
/// to release the transport cleanly first.
pub struct Coordinator {
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Spawn a coordinator with `config` over `transport`
    pub fn spawn<T: BroadcastTransport + 'static>(
        transport: T,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        CoordinatorBuilder::new(transport).with_config(config).spawn()
    }

    /// Broadcast an empty public message as `identity` until superseded
    pub async fn start_presence(&self, identity: Identity) -> Result<()> {
        self.request(|reply| Command::StartPresence { identity, reply })
            .await?
    }

    /// Broadcast a public message
    pub async fn send_public(
        &self,
        identity: &Identity,
        text: impl Into<String>,
    ) -> Result<SendReceipt> {
        let envelope = Envelope::public(identity, text);
        let identity = identity.clone();
        self.request(|reply| Command::Send {
            identity,
            envelope,
            reply,
        })
        .await?
    }

    /// Broadcast a message addressed to `recipient`
    pub async fn send_private(
        &self,
        identity: &Identity,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<SendReceipt> {
        let envelope = Envelope::private(identity, recipient, text);
        let identity = identity.clone();
        self.request(|reply| Command::Send {
            identity,
            envelope,
            reply,
        })
        .await?
    }

    /// Start delivering inbound messages to `listener`, replacing any previous one
    pub async fn start_listening<L: MessageListener + 'static>(&self, listener: L) -> Result<()> {
        let listener: Box<dyn MessageListener> = Box::new(listener);
        self.request(|reply| Command::StartListening { listener, reply })
            .await?
    }

    /// Stop reception and drop the listener
    pub async fn stop_listening(&self) -> Result<()> {
        self.request(|reply| Command::StopListening { reply }).await?
    }

    /// Stop transmitting and listening; safe to call repeatedly
    pub async fn stop(&self) -> Result<()> {
        match self.request(|reply| Command::Stop { reply }).await {
            Ok(result) => result,
            Err(BeaconError::Channel { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Current state snapshot
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Peers heard within the nearby time-to-live
    pub async fn nearby(&self) -> Result<Vec<NearbyPeer>> {
        self.request(|reply| Command::Nearby { reply }).await
    }

    /// Whether the coordinator task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop everything and wait for the task to exit
    pub async fn shutdown(mut self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                BeaconError::channel(format!("Coordinator task failed: {e}"))
            })?;
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| BeaconError::channel("Coordinator is not running"))?;
        response
            .await
            .map_err(|_| BeaconError::channel("Coordinator dropped the request"))
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Coordinator Task
// ----------------------------------------------------------------------------

struct PendingSend {
    sequence: SequenceId,
    message_id: MessageId,
    outcome: oneshot::Sender<SendOutcome>,
    resume_presence: bool,
}

struct CoordinatorTask {
    config: CoordinatorConfig,
    transport: Box<dyn BroadcastTransport>,
    time_source: Arc<dyn TimeSource>,
    fragmenter: MessageFragmenter,
    scheduler: TransmitScheduler,
    pipeline: ReceivePipeline,
    nearby: NearbyPeers,
    listener: Option<Box<dyn MessageListener>>,
    listening: bool,
    /// Identity of the most recent broadcast, used for self filtering
    identity: Option<Identity>,
    /// Set while presence should resume between messages
    presence_identity: Option<Identity>,
    transmit: TransmitState,
    pending_send: Option<PendingSend>,
    presence_revert: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    events: TransportEventReceiver,
    /// Keeps the event channel open for the lifetime of the task
    _event_sender: TransportEventSender,
}

impl CoordinatorTask {
    async fn run(mut self) {
        info!("Coordinator starting on transport {}", self.transport.name());

        let mut maintenance = tokio::time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        maintenance.tick().await;

        loop {
            let transmit_deadline = self.scheduler.next_deadline();
            let presence_deadline = self.presence_revert;

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            self.stop_all().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }

                _ = sleep_until_opt(transmit_deadline) => {
                    self.advance_transmit().await;
                }

                _ = sleep_until_opt(presence_deadline) => {
                    self.presence_revert = None;
                    self.resume_presence().await;
                }

                _ = maintenance.tick() => {
                    self.maintain();
                }
            }
        }

        self.stop_all().await;
        info!("Coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartPresence { identity, reply } => {
                let result = self.start_presence(identity).await;
                let _ = reply.send(result);
            }
            Command::Send {
                identity,
                envelope,
                reply,
            } => {
                let result = self.send(identity, envelope).await;
                let _ = reply.send(result);
            }
            Command::StartListening { listener, reply } => {
                let result = self.start_listening(listener).await;
                let _ = reply.send(result);
            }
            Command::StopListening { reply } => {
                self.stop_listening().await;
                let _ = reply.send(Ok(()));
            }
            Command::Stop { reply } => {
                self.stop_all().await;
                let _ = reply.send(Ok(()));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Nearby { reply } => {
                let _ = reply.send(self.nearby.snapshot());
            }
            Command::Shutdown { reply } => {
                // Handled by the loop
                let _ = reply.send(());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------------

    fn fragments_for(&self, envelope: &Envelope) -> Result<(MessageId, Vec<Vec<u8>>)> {
        let encoded = envelope.encode()?;
        let message_id = MessageId::from_timestamp(self.time_source.now());
        let fragments = MessageFragmenter::fragment_message(
            message_id.clone(),
            &encoded,
            self.fragmenter.chunk_size(),
        )?;
        Ok((message_id, fragments.iter().map(Fragment::to_bytes).collect()))
    }

    async fn start_presence(&mut self, identity: Identity) -> Result<()> {
        let (message_id, payloads) = self.fragments_for(&Envelope::presence(&identity))?;

        self.presence_revert = None;
        let started = self.scheduler.start_cycle(
            payloads,
            self.config.protocol.inter_fragment_delay,
            Instant::now(),
        );
        self.supersede(started.superseded);

        info!("Broadcasting presence as {} ({})", identity, message_id);
        self.identity = Some(identity.clone());
        self.presence_identity = Some(identity);
        self.transmit = TransmitState::Presence;

        if let Err(e) = self.broadcast_step(started.first).await {
            self.scheduler.cancel();
            self.presence_identity = None;
            self.transmit = TransmitState::Idle;
            return Err(e);
        }
        Ok(())
    }

    async fn send(&mut self, identity: Identity, envelope: Envelope) -> Result<SendReceipt> {
        let kind = envelope.kind();
        let (message_id, payloads) = self.fragments_for(&envelope)?;
        let fragments = payloads.len();

        self.presence_revert = None;
        let resume_presence = self.config.auto_presence && self.presence_identity.is_some();
        if resume_presence {
            self.presence_identity = Some(identity.clone());
        }

        let started = self.scheduler.start(
            payloads,
            self.config.protocol.inter_fragment_delay,
            Instant::now(),
        );
        self.supersede(started.superseded);

        info!(
            "Sending {} message {} as {} fragment(s)",
            kind, message_id, fragments
        );
        let (outcome, receipt) = oneshot::channel();
        self.pending_send = Some(PendingSend {
            sequence: started.sequence,
            message_id: message_id.clone(),
            outcome,
            resume_presence,
        });
        self.identity = Some(identity);
        self.transmit = TransmitState::Message {
            message_id: message_id.clone(),
            fragments,
        };

        if let Err(e) = self.broadcast_step(started.first).await {
            self.scheduler.cancel();
            self.pending_send = None;
            self.transmit = TransmitState::Idle;
            return Err(e);
        }

        Ok(SendReceipt {
            message_id,
            fragments,
            outcome: receipt,
        })
    }

    async fn advance_transmit(&mut self) {
        let Some(step) = self.scheduler.poll(Instant::now()) else {
            return;
        };
        let sequence = step.sequence;

        if let Err(e) = self.broadcast_step(step).await {
            error!("Transport unusable, abandoning {}: {}", sequence, e);
            self.scheduler.cancel();
            self.finish_sequence(
                sequence,
                SendOutcome::Failed {
                    reason: e.to_string(),
                },
            );
            self.presence_identity = None;
            self.transmit = TransmitState::Idle;
        }
    }

    /// Put one step on the air
    ///
    /// Broadcast failures are logged and skipped; only errors that make the
    /// transport unusable are returned.
    async fn broadcast_step(&mut self, step: SequenceStep) -> Result<()> {
        let SequenceStep {
            sequence,
            kind,
            index,
            payload,
            completes,
        } = step;
        let len = payload.len();

        match self.transport.broadcast(payload).await {
            Ok(()) => trace!(
                "{}: {:?} fragment {} on air ({} bytes)",
                sequence,
                kind,
                index + 1,
                len
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("{}: fragment {} not broadcast: {}", sequence, index + 1, e),
        }

        if completes {
            self.finish_sequence(sequence, SendOutcome::Completed);
        }
        Ok(())
    }

    fn supersede(&mut self, superseded: Option<SequenceId>) {
        if let Some(sequence) = superseded {
            self.finish_sequence(sequence, SendOutcome::Superseded);
        }
    }

    fn finish_sequence(&mut self, sequence: SequenceId, outcome: SendOutcome) {
        if !self
            .pending_send
            .as_ref()
            .is_some_and(|pending| pending.sequence == sequence)
        {
            return;
        }
        let Some(pending) = self.pending_send.take() else {
            return;
        };
        debug!("Message {} finished: {:?}", pending.message_id, outcome);

        if outcome == SendOutcome::Completed && pending.resume_presence {
            self.presence_revert = Some(Instant::now() + self.config.presence_grace);
        }
        let _ = pending.outcome.send(outcome);
    }

    async fn resume_presence(&mut self) {
        let Some(identity) = self.presence_identity.clone() else {
            return;
        };
        debug!("Grace period over, resuming presence");
        if let Err(e) = self.start_presence(identity).await {
            error!("Could not resume presence: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------------

    async fn start_listening(&mut self, listener: Box<dyn MessageListener>) -> Result<()> {
        self.pipeline.reset();

        if !self.listening {
            self.transport.start_receiving().await?;
            self.listening = true;
            info!("Listening on transport {}", self.transport.name());
        } else {
            debug!("Listener replaced");
        }
        self.listener = Some(listener);
        Ok(())
    }

    async fn stop_listening(&mut self) {
        if self.listening {
            if let Err(e) = self.transport.stop_receiving().await {
                warn!("Failed to stop receiving: {}", e);
            }
            self.listening = false;
            info!("Stopped listening");
        }
        self.listener = None;
        self.pipeline.reset();
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PayloadReceived {
                payload,
                sender,
                rssi,
            } => {
                if !self.listening {
                    trace!("Ignoring payload from {} while not listening", sender);
                    return;
                }
                let now = self.time_source.now();
                self.nearby.heard(&sender, rssi, now);
                let outcome = self.pipeline.on_payload(&payload, &sender, rssi, now);
                let PipelineOutcome::Delivered(message) = outcome else {
                    return;
                };

                if self.config.suppress_self
                    && self.identity.as_ref().is_some_and(|me| message.is_from(me))
                {
                    trace!("Ignoring own {} message", message.kind());
                    return;
                }

                self.nearby.observe(&message, now);
                if let Some(listener) = self.listener.as_mut() {
                    dispatch(listener.as_mut(), message);
                }
            }
            TransportEvent::BroadcastStarted => {
                trace!("Broadcast on air");
            }
            TransportEvent::BroadcastFailed { reason } => {
                error!("Broadcast failed: {}", reason);
            }
            TransportEvent::ReceiveFailed { reason } => {
                warn!("Reception stopped: {}", reason);
                self.listening = false;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn stop_all(&mut self) {
        if let Some(sequence) = self.scheduler.cancel() {
            self.finish_sequence(sequence, SendOutcome::Cancelled);
        }
        if let Some(pending) = self.pending_send.take() {
            let _ = pending.outcome.send(SendOutcome::Cancelled);
        }
        self.presence_revert = None;
        self.presence_identity = None;

        if self.transmit != TransmitState::Idle {
            if let Err(e) = self.transport.stop_broadcast().await {
                warn!("Failed to stop broadcast: {}", e);
            }
            self.transmit = TransmitState::Idle;
            info!("Stopped broadcasting");
        }

        self.stop_listening().await;
    }

    fn maintain(&mut self) {
        let now = self.time_source.now();
        let expired = self.pipeline.maintain(now);
        let departed = self.nearby.expire(now);
        if expired > 0 || departed > 0 {
            debug!(
                "Maintenance: {} stale reassemblies, {} peers out of range",
                expired, departed
            );
        }
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            transport: self.transport.name().to_string(),
            transmit: self.transmit.clone(),
            listening: self.listening,
            identity: self.identity.clone(),
            pending_reassemblies: self.pipeline.pending_reassemblies(),
            fragment_dedup: self.pipeline.fragment_stats(),
            message_dedup: self.pipeline.message_stats(),
            nearby_peers: self.nearby.len(),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
