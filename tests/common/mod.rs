//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voicebridge::session::{
    AggregatorPolicy, CoordinatorHandle, CoordinatorSettings, ServerMessage, StageTimeouts, Turn,
    TurnCoordinator, WorkerPool,
};
use voicebridge::{Collaborators, Error, ReplyGenerator, Result, SpeechRecognizer, SpeechSynthesizer};

/// Scripted outcome of a fake collaborator call
#[derive(Clone)]
pub struct Script<T> {
    pub delay: Duration,
    pub outcome: std::result::Result<T, String>,
}

impl<T> Script<T> {
    pub fn ok(value: T) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(value),
        }
    }

    pub fn fail(reason: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(reason.to_string()),
        }
    }

    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub struct FakeRecognizer {
    script: Mutex<Script<String>>,
    calls: Mutex<Vec<Vec<u8>>>,
}

impl FakeRecognizer {
    pub fn set(&self, script: Script<String>) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn recognize(&self, audio: &[u8]) -> Result<String> {
        self.calls.lock().unwrap().push(audio.to_vec());
        let script = self.script.lock().unwrap().clone();
        tokio::time::sleep(script.delay).await;
        script.outcome.map_err(Error::Recognition)
    }
}

pub struct FakeGenerator {
    script: Mutex<Script<String>>,
    calls: Mutex<Vec<(String, Vec<Turn>)>>,
}

impl FakeGenerator {
    pub fn set(&self, script: Script<String>) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> Vec<(String, Vec<Turn>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), history.to_vec()));
        let script = self.script.lock().unwrap().clone();
        tokio::time::sleep(script.delay).await;
        script.outcome.map_err(Error::Generation)
    }
}

pub struct FakeSynthesizer {
    script: Mutex<Script<Vec<u8>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn set(&self, script: Script<Vec<u8>>) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        let script = self.script.lock().unwrap().clone();
        tokio::time::sleep(script.delay).await;
        script.outcome.map_err(Error::Synthesis)
    }
}

/// Fake collaborators that succeed instantly unless re-scripted
pub struct Fakes {
    pub recognizer: Arc<FakeRecognizer>,
    pub generator: Arc<FakeGenerator>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            recognizer: Arc::new(FakeRecognizer {
                script: Mutex::new(Script::ok("hello there".to_string())),
                calls: Mutex::default(),
            }),
            generator: Arc::new(FakeGenerator {
                script: Mutex::new(Script::ok("general kenobi".to_string())),
                calls: Mutex::default(),
            }),
            synthesizer: Arc::new(FakeSynthesizer {
                script: Mutex::new(Script::ok(b"ID3-fake-mp3".to_vec())),
                calls: Mutex::default(),
            }),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            recognizer: self.recognizer.clone(),
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
        }
    }
}

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        policy: AggregatorPolicy {
            quiet_interval: Duration::from_secs(1),
            min_chunks: 3,
            min_bytes: 6400,
        },
        history_cap: 20,
        history_rounds: 3,
    }
}

pub fn test_pool() -> WorkerPool {
    WorkerPool::new(
        4,
        StageTimeouts {
            recognition: Duration::from_secs(8),
            generation: Duration::from_secs(15),
            synthesis: Duration::from_secs(10),
        },
    )
}

/// Start a coordinator wired to fakes; returns its handle and the client side
pub fn start(fakes: &Fakes) -> (CoordinatorHandle, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = TurnCoordinator::spawn(
        "test-conn",
        test_settings(),
        fakes.collaborators(),
        test_pool(),
        tx,
    );
    (handle, rx)
}

/// Next message for the client, failing after a minute of (virtual) time
pub async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no message within a minute")
        .expect("outbound channel closed")
}

/// Let virtual time pass and assert nothing was sent meanwhile
pub async fn assert_quiet(rx: &mut mpsc::Receiver<ServerMessage>, period: Duration) {
    tokio::time::sleep(period).await;
    if let Ok(msg) = rx.try_recv() {
        panic!("unexpected message: {msg:?}");
    }
}

/// A chunk large enough to complete an utterance on its own
pub fn utterance_chunk(fill: u8) -> Vec<u8> {
    vec![fill; 6400]
}
