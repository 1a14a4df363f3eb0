//! In-memory media element
//!
//! Records every command it receives and lets the owner of the paired
//! [`FakeMediaHandle`] inject media events, so session behaviour can be
//! exercised without audio hardware or a network.

use super::{MediaElement, MediaError, MediaEvent, MediaEventSender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// A command received by the fake element
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Load(String),
    Play,
    Pause,
    SetVolume(f32),
    SetMuted(bool),
}

#[derive(Debug)]
struct FakeState {
    events: Option<MediaEventSender>,
    play_results: VecDeque<Result<(), MediaError>>,
    source: Option<String>,
    volume: f32,
    muted: bool,
}

/// Media element that records commands
#[derive(Debug)]
pub struct FakeMediaElement {
    state: Arc<Mutex<FakeState>>,
    calls: mpsc::UnboundedSender<MediaCall>,
}

/// Test-side handle of a [`FakeMediaElement`]
#[derive(Debug)]
pub struct FakeMediaHandle {
    state: Arc<Mutex<FakeState>>,
    calls: mpsc::UnboundedReceiver<MediaCall>,
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeMediaElement {
    /// Create an element and its handle
    pub fn new() -> (Self, FakeMediaHandle) {
        let state = Arc::new(Mutex::new(FakeState {
            events: None,
            play_results: VecDeque::new(),
            source: None,
            volume: 1.0,
            muted: false,
        }));
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                state: state.clone(),
                calls: tx,
            },
            FakeMediaHandle { state, calls: rx },
        )
    }

    fn record(&self, call: MediaCall) {
        let _ = self.calls.send(call);
    }
}

impl MediaElement for FakeMediaElement {
    fn subscribe(&mut self, events: MediaEventSender) {
        lock(&self.state).events = Some(events);
    }

    fn load(&mut self, url: &str) {
        lock(&self.state).source = Some(url.to_string());
        self.record(MediaCall::Load(url.to_string()));
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.record(MediaCall::Play);
        lock(&self.state).play_results.pop_front().unwrap_or(Ok(()))
    }

    fn pause(&mut self) {
        self.record(MediaCall::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        lock(&self.state).volume = volume;
        self.record(MediaCall::SetVolume(volume));
    }

    fn set_muted(&mut self, muted: bool) {
        lock(&self.state).muted = muted;
        self.record(MediaCall::SetMuted(muted));
    }
}

impl FakeMediaHandle {
    /// Deliver an event as if the element had emitted it
    ///
    /// Returns `false` when nobody is subscribed.
    pub fn emit(&self, event: MediaEvent) -> bool {
        match &lock(&self.state).events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Make the next `play()` call fail with `error`
    pub fn reject_next_play(&self, error: MediaError) {
        lock(&self.state).play_results.push_back(Err(error));
    }

    /// Wait for the next recorded command
    pub async fn next_call(&mut self) -> Option<MediaCall> {
        self.calls.recv().await
    }

    /// All commands recorded so far and not yet consumed
    pub fn drain_calls(&mut self) -> Vec<MediaCall> {
        let mut calls = Vec::new();
        while let Ok(call) = self.calls.try_recv() {
            calls.push(call);
        }
        calls
    }

    /// Source passed to the last `load`
    pub fn source(&self) -> Option<String> {
        lock(&self.state).source.clone()
    }

    /// Volume last set on the element
    pub fn volume(&self) -> f32 {
        lock(&self.state).volume
    }

    /// Mute flag last set on the element
    pub fn muted(&self) -> bool {
        lock(&self.state).muted
    }
}
