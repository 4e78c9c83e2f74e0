//! Per-connection turn coordination
//!
//! Each connection runs one [`TurnCoordinator`] actor. The actor alone owns the
//! connection's [`AudioAggregator`] and [`ConversationState`], decides when an
//! utterance is complete, and starts at most one pipeline task at a time.
//!
//! ```text
//!  gateway ──commands──▶ coordinator ──outbound──▶ gateway ──▶ client
//!                          ▲      │
//!                 events   │      │ spawn (turn id, child token)
//!                          └── pipeline: recognize ▶ generate ▶ synthesize
//! ```
//!
//! The pipeline never writes to the client. It reports tagged events back and
//! the coordinator forwards only those of the turn that is still live, so an
//! interrupted turn cannot leak text or audio even when its external calls
//! were already in flight.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Stage;
use super::aggregator::{AggregatorPolicy, AudioAggregator, Check};
use super::history::{ConversationState, Turn};
use super::pool::WorkerPool;
use super::protocol::ServerMessage;
use crate::config::Config;
use crate::voice::{Collaborators, cached_fallback_tone};
use crate::{Error, Result};

/// Spoken in place of a reply when generation fails
pub const APOLOGY: &str = "Sorry, I couldn't come up with an answer just now. Please try again.";

const RECOGNITION_FAILED: &str = "Speech recognition failed, please try again";
const INTERRUPTED: &str = "Playback stopped, ready for new speech input";
const BUSY: &str = "Still answering the previous request, please wait";
const EMPTY_TEXT: &str = "Text input is empty";
const HISTORY_CLEARED: &str = "Conversation history cleared";
const AUDIO_UNAVAILABLE: &str = "Audio reply unavailable for this turn";
const TURN_FAILED: &str = "Something went wrong with this turn, please try again";

/// Per-connection tuning
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub policy: AggregatorPolicy,
    pub history_cap: usize,
    /// Rounds of history sent along with each generation request
    pub history_rounds: usize,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            policy: AggregatorPolicy::from(&config.audio),
            history_cap: config.pipeline.history_cap,
            history_rounds: config.pipeline.history_rounds,
        }
    }
}

#[derive(Debug)]
enum Command {
    Audio(Vec<u8>),
    Text(String),
    Interrupt,
    Reset,
}

enum Utterance {
    Audio(Vec<u8>),
    Text(String),
}

/// Progress reported by a pipeline task, tagged with its turn
#[derive(Debug)]
enum PipelineEvent {
    Recognized { turn: u64, text: String },
    RecognitionFailed { turn: u64, reason: String },
    Replied { turn: u64, text: String, generated: bool },
    Synthesized { turn: u64, text: String, audio: Vec<u8> },
    Failed { turn: u64, message: &'static str },
    Finished { turn: u64 },
}

impl PipelineEvent {
    const fn turn(&self) -> u64 {
        match self {
            Self::Recognized { turn, .. }
            | Self::RecognitionFailed { turn, .. }
            | Self::Replied { turn, .. }
            | Self::Synthesized { turn, .. }
            | Self::Failed { turn, .. }
            | Self::Finished { turn } => *turn,
        }
    }
}

struct LiveTurn {
    id: u64,
    cancel: CancellationToken,
}

/// Cloneable control surface for one connection's coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    connection_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    stage: watch::Receiver<Stage>,
    shutdown: CancellationToken,
}

impl CoordinatorHandle {
    /// Buffer an inbound audio chunk
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the coordinator has stopped
    pub async fn push_audio(&self, chunk: Vec<u8>) -> Result<()> {
        self.send(Command::Audio(chunk)).await
    }

    /// Start a turn from typed text, skipping recognition
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the coordinator has stopped
    pub async fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Text(text.into())).await
    }

    /// Abandon buffered audio and the live turn
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the coordinator has stopped
    pub async fn interrupt(&self) -> Result<()> {
        self.send(Command::Interrupt).await
    }

    /// Clear the conversation history
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the coordinator has stopped
    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Reset).await
    }

    /// Tear the connection down; safe to call at any point, any number of times
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    async fn send(&self, command: Command) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionLost(self.connection_id.to_string()));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ConnectionLost(self.connection_id.to_string()))
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current pipeline stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Receiver that observes every stage transition
    #[must_use]
    pub fn watch_stage(&self) -> watch::Receiver<Stage> {
        self.stage.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the coordinator has begun tearing down
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

/// Owns one connection's audio buffer, history and pipeline
pub struct TurnCoordinator {
    connection_id: Arc<str>,
    settings: CoordinatorSettings,
    aggregator: AudioAggregator,
    history: ConversationState,
    collaborators: Collaborators,
    pool: WorkerPool,
    outbound: mpsc::Sender<ServerMessage>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<PipelineEvent>,
    events_rx: mpsc::Receiver<PipelineEvent>,
    stage: watch::Sender<Stage>,
    shutdown: CancellationToken,
    live: Option<LiveTurn>,
    turns_started: u64,
}

impl TurnCoordinator {
    /// Start the coordinator for a new connection
    ///
    /// `outbound` is the only way the coordinator reaches the client.
    pub fn spawn(
        connection_id: impl Into<String>,
        settings: CoordinatorSettings,
        collaborators: Collaborators,
        pool: WorkerPool,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> CoordinatorHandle {
        let connection_id: Arc<str> = Arc::from(connection_id.into());
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(16);
        let (stage_tx, stage_rx) = watch::channel(Stage::Idle);
        let shutdown = CancellationToken::new();

        let coordinator = Self {
            connection_id: Arc::clone(&connection_id),
            aggregator: AudioAggregator::new(settings.policy),
            history: ConversationState::new(settings.history_cap),
            settings,
            collaborators,
            pool,
            outbound,
            commands: commands_rx,
            events_tx,
            events_rx,
            stage: stage_tx,
            shutdown: shutdown.clone(),
            live: None,
            turns_started: 0,
        };
        tokio::spawn(coordinator.run());

        CoordinatorHandle {
            connection_id,
            commands: commands_tx,
            stage: stage_rx,
            shutdown,
        }
    }

    async fn run(mut self) {
        tracing::debug!(connection_id = %self.connection_id, "turn coordinator started");

        loop {
            // buffered audio is not judged while a turn is live
            let debounce = if self.live.is_none() {
                self.aggregator.deadline()
            } else {
                None
            };

            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.on_pipeline_event(event).await,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                () = wait_until(debounce) => {
                    self.on_debounce();
                    Ok(())
                }
            };

            if let Err(e) = outcome {
                tracing::info!(connection_id = %self.connection_id, error = %e, "client unreachable");
                break;
            }
        }

        self.on_disconnect();
    }

    async fn on_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Audio(chunk) => {
                tracing::trace!(connection_id = %self.connection_id, bytes = chunk.len(), "audio chunk");
                self.aggregator.append(chunk, Instant::now());
                Ok(())
            }
            Command::Text(text) => self.on_text(&text).await,
            Command::Interrupt => self.on_interrupt().await,
            Command::Reset => {
                self.history.clear();
                tracing::info!(connection_id = %self.connection_id, "history cleared");
                self.emit(ServerMessage::HistoryCleared {
                    message: HISTORY_CLEARED.to_string(),
                })
                .await
            }
        }
    }

    fn on_debounce(&mut self) {
        match self.aggregator.check(Instant::now()) {
            Check::Ready => {
                if let Some(audio) = self.aggregator.drain() {
                    self.on_audio_ready(audio);
                }
            }
            Check::Insufficient => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    chunks = self.aggregator.chunk_count(),
                    bytes = self.aggregator.buffered_bytes(),
                    "quiet interval elapsed with too little audio"
                );
            }
            Check::Superseded | Check::Idle => {}
        }
    }

    /// A complete utterance is ready for recognition
    fn on_audio_ready(&mut self, audio: Vec<u8>) {
        tracing::info!(connection_id = %self.connection_id, bytes = audio.len(), "utterance complete");
        self.start_turn(Utterance::Audio(audio));
    }

    async fn on_text(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return self.emit(ServerMessage::error(EMPTY_TEXT)).await;
        }
        if self.live.is_some() {
            tracing::debug!(connection_id = %self.connection_id, "text input while busy");
            return self.emit(ServerMessage::error(BUSY)).await;
        }
        tracing::info!(connection_id = %self.connection_id, text = %text, "text input");
        self.start_turn(Utterance::Text(text.to_string()));
        Ok(())
    }

    fn start_turn(&mut self, utterance: Utterance) {
        if let Some(live) = &self.live {
            tracing::debug!(connection_id = %self.connection_id, turn = live.id, "turn already live, ignoring");
            return;
        }

        self.turns_started += 1;
        let turn = self.turns_started;
        let context = self.history.recent_history(self.settings.history_rounds);

        let stage = match &utterance {
            Utterance::Audio(_) => Stage::Recognizing,
            Utterance::Text(text) => {
                self.history.append_user(text.as_str());
                Stage::Generating
            }
        };

        let cancel = self.shutdown.child_token();
        let pipeline = Pipeline {
            connection_id: Arc::clone(&self.connection_id),
            turn,
            context,
            collaborators: self.collaborators.clone(),
            pool: self.pool.clone(),
            cancel: cancel.clone(),
            events: self.events_tx.clone(),
            fallback: cached_fallback_tone(),
        };
        let task = tokio::spawn(pipeline.run(utterance));

        // A panicking collaborator must still release the turn
        let events = self.events_tx.clone();
        let connection_id = Arc::clone(&self.connection_id);
        tokio::spawn(async move {
            match task.await {
                Err(e) if e.is_panic() => {
                    tracing::error!(connection_id = %connection_id, turn, "pipeline task panicked");
                    let _ = events
                        .send(PipelineEvent::Failed {
                            turn,
                            message: TURN_FAILED,
                        })
                        .await;
                    let _ = events.send(PipelineEvent::Finished { turn }).await;
                }
                _ => {}
            }
        });

        self.live = Some(LiveTurn { id: turn, cancel });
        self.set_stage(stage);
        tracing::debug!(connection_id = %self.connection_id, turn, stage = ?stage, "turn started");
    }

    async fn on_pipeline_event(&mut self, event: PipelineEvent) -> Result<()> {
        if self.live.as_ref().map(|live| live.id) != Some(event.turn()) {
            tracing::debug!(connection_id = %self.connection_id, turn = event.turn(), "dropping event from stale turn");
            return Ok(());
        }

        match event {
            PipelineEvent::Recognized { text, .. } => {
                self.history.append_user(text.as_str());
                self.set_stage(Stage::Generating);
                self.emit(ServerMessage::AsrResult { text }).await
            }
            PipelineEvent::RecognitionFailed { reason, .. } => {
                tracing::warn!(connection_id = %self.connection_id, reason = %reason, "recognition failed");
                self.emit(ServerMessage::AsrError {
                    message: RECOGNITION_FAILED.to_string(),
                })
                .await
            }
            PipelineEvent::Replied {
                text, generated, ..
            } => {
                if generated {
                    self.history.append_assistant(text.as_str());
                }
                self.set_stage(Stage::Synthesizing);
                self.emit(ServerMessage::LlmResponse { text }).await
            }
            PipelineEvent::Synthesized { text, audio, .. } => {
                self.set_stage(Stage::Delivering);
                self.emit(ServerMessage::tts_audio(&audio, text)).await
            }
            PipelineEvent::Failed { message, .. } => self.emit(ServerMessage::error(message)).await,
            PipelineEvent::Finished { turn } => {
                tracing::debug!(connection_id = %self.connection_id, turn, "turn finished");
                self.live = None;
                self.set_stage(Stage::Idle);
                Ok(())
            }
        }
    }

    async fn on_interrupt(&mut self) -> Result<()> {
        self.aggregator.clear();
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
            tracing::info!(connection_id = %self.connection_id, turn = live.id, "turn interrupted");
        }
        self.set_stage(Stage::Idle);
        self.emit(ServerMessage::InterruptionConfirmed {
            message: INTERRUPTED.to_string(),
        })
        .await
    }

    fn on_disconnect(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
        }
        self.aggregator.clear();
        self.history.clear();
        self.set_stage(Stage::Idle);
        self.shutdown.cancel();
        tracing::info!(connection_id = %self.connection_id, turns = self.turns_started, "turn coordinator stopped");
    }

    fn set_stage(&self, stage: Stage) {
        self.stage.send_replace(stage);
    }

    async fn emit(&self, message: ServerMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::ConnectionLost(self.connection_id.to_string()))
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One turn's recognize, generate and synthesize sequence
struct Pipeline {
    connection_id: Arc<str>,
    turn: u64,
    context: Vec<Turn>,
    collaborators: Collaborators,
    pool: WorkerPool,
    cancel: CancellationToken,
    events: mpsc::Sender<PipelineEvent>,
    fallback: Option<&'static [u8]>,
}

impl Pipeline {
    async fn run(self, utterance: Utterance) {
        if self.execute(utterance).await.is_some() {
            let _ = self.events.send(PipelineEvent::Finished { turn: self.turn }).await;
        } else {
            tracing::debug!(connection_id = %self.connection_id, turn = self.turn, "turn cancelled");
        }
    }

    /// `None` means the turn was cancelled
    async fn execute(&self, utterance: Utterance) -> Option<()> {
        let turn = self.turn;
        let text = match utterance {
            Utterance::Text(text) => text,
            Utterance::Audio(audio) => {
                let recognized = self
                    .call(
                        Stage::Recognizing,
                        self.collaborators.recognizer.recognize(&audio),
                    )
                    .await?;
                let recognized = recognized.and_then(|text| {
                    let text = text.trim();
                    if text.is_empty() {
                        Err(Error::Recognition("empty transcript".to_string()))
                    } else {
                        Ok(text.to_string())
                    }
                });
                match recognized {
                    Ok(text) => {
                        self.report(PipelineEvent::Recognized {
                            turn,
                            text: text.clone(),
                        })
                        .await?;
                        text
                    }
                    Err(e) => {
                        return self
                            .report(PipelineEvent::RecognitionFailed {
                                turn,
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            }
        };

        self.checkpoint()?;
        let generated = self
            .call(
                Stage::Generating,
                self.collaborators.generator.generate(&text, &self.context),
            )
            .await?;
        let (reply, generated) = match generated {
            Ok(reply) => (reply, true),
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, turn, error = %e, "generation failed, apologizing");
                (APOLOGY.to_string(), false)
            }
        };
        self.report(PipelineEvent::Replied {
            turn,
            text: reply.clone(),
            generated,
        })
        .await?;

        self.checkpoint()?;
        let synthesized = self
            .call(
                Stage::Synthesizing,
                self.collaborators.synthesizer.synthesize(&reply),
            )
            .await?;
        let audio = match synthesized {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, turn, error = %e, "synthesis failed, sending tone");
                let Some(tone) = self.fallback else {
                    return self
                        .report(PipelineEvent::Failed {
                            turn,
                            message: AUDIO_UNAVAILABLE,
                        })
                        .await;
                };
                tone.to_vec()
            }
        };

        self.checkpoint()?;
        self.report(PipelineEvent::Synthesized {
            turn,
            text: reply,
            audio,
        })
        .await
    }

    /// Run a collaborator call in the pool, abandoning it on cancellation
    async fn call<T>(&self, stage: Stage, call: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.pool.run(stage, call) => Some(result),
        }
    }

    fn checkpoint(&self) -> Option<()> {
        (!self.cancel.is_cancelled()).then_some(())
    }

    async fn report(&self, event: PipelineEvent) -> Option<()> {
        self.checkpoint()?;
        self.events.send(event).await.ok()
    }
}
