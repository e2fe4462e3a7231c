//! Spin Orchestrator: one full play cycle
//!
//! Sequence for every play:
//!
//! 1. Signal `off` to the hardware (best-effort, never awaited)
//! 2. Advance content when asked to (or when the last play was a win)
//! 3. Decide the outcome and the stop index for every reel
//! 4. Spin all reels, wait for the warm-up
//! 5. Stop reels left to right, pausing between each
//! 6. Signal `win` or `idle` and publish the result

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pb_link::{ArduinoSignal, SignalDispatcher};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::catalog::{ContentSource, ContentUnit};
use crate::config::SlotConfig;
use crate::error::{SlotError, SlotResult};
use crate::events::{MachineEvent, TelemetryEvent};
use crate::outcome::{AttemptState, OutcomeEngine};
use crate::reel::ReelController;

const EVENT_CAPACITY: usize = 64;

/// When a reel settled during a play
#[derive(Debug, Clone, Copy)]
pub struct ReelStopRecord {
    pub reel: usize,
    pub index: usize,
    pub stopped_at: Instant,
}

/// Summary of one completed play
#[derive(Debug, Clone)]
pub struct PlayReport {
    pub spin_id: u64,
    pub is_win: bool,
    pub stop_indices: Vec<usize>,
    pub attempt_state: AttemptState,
    pub stops: Vec<ReelStopRecord>,
}

/// Identifies the story currently on the reels
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoryRef {
    story_id: String,
    storyline: String,
}

impl StoryRef {
    fn of(unit: &ContentUnit) -> Self {
        Self {
            story_id: unit.story.id.clone(),
            storyline: unit.storyline_title.clone(),
        }
    }
}

pub struct SpinOrchestrator {
    reels: Vec<ReelController>,
    engine: OutcomeEngine,
    attempts: AttemptState,
    content: Box<dyn ContentSource>,
    current: StoryRef,
    winning: Vec<usize>,
    signals: SignalDispatcher,
    events: broadcast::Sender<MachineEvent>,
    config: SlotConfig,
    spin_count: u64,
    /// Last play was a win; the next one moves on to fresh content
    content_spent: bool,
    story_played: Arc<AtomicBool>,
    pending_playback: Option<JoinHandle<()>>,
}

impl SpinOrchestrator {
    /// Load the current content unit onto the reels
    pub fn new(
        reels: Vec<ReelController>,
        content: Box<dyn ContentSource>,
        signals: SignalDispatcher,
        mut engine: OutcomeEngine,
        config: SlotConfig,
    ) -> SlotResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let unit = content.current_unit();
        let attempts = engine.fresh_attempt_state();

        let mut orchestrator = Self {
            reels,
            engine,
            attempts,
            content,
            current: StoryRef::of(&unit),
            winning: Vec::new(),
            signals,
            events,
            config,
            spin_count: 0,
            content_spent: false,
            story_played: Arc::new(AtomicBool::new(false)),
            pending_playback: None,
        };
        orchestrator.apply_unit(&unit)?;

        log::info!(
            "[Spin] Ready with {} reels, story '{}' (win on attempt {})",
            orchestrator.reels.len(),
            orchestrator.current.story_id,
            attempts.attempts_to_win
        );
        Ok(orchestrator)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MachineEvent> {
        self.events.subscribe()
    }

    pub fn attempt_state(&self) -> AttemptState {
        self.attempts
    }

    /// Override the attempt counters (operator tooling)
    pub fn set_attempt_state(&mut self, state: AttemptState) {
        self.attempts = state;
    }

    pub fn winning_indices(&self) -> &[usize] {
        &self.winning
    }

    pub fn reel_count(&self) -> usize {
        self.reels.len()
    }

    /// Put the hardware into its resting state
    pub fn announce_idle(&self) {
        self.signals.dispatch(ArduinoSignal::Idle);
    }

    /// Start story playback for the current content now
    pub fn request_story_playback(&mut self) {
        self.cancel_pending_playback();
        mark_story_played(&self.story_played, &self.events, &self.current);
    }

    /// Run one full play cycle
    pub async fn play(&mut self, advance_content: bool) -> SlotResult<PlayReport> {
        self.cancel_pending_playback();
        self.signals.dispatch(ArduinoSignal::Off);

        self.spin_count += 1;
        let spin_id = self.spin_count;

        if advance_content || self.content_spent {
            self.advance_content()?;
        }
        self.telemetry(TelemetryEvent::Spin {
            story_id: self.current.story_id.clone(),
            storyline: self.current.storyline.clone(),
        });

        let lengths: Vec<usize> = self.reels.iter().map(ReelController::item_count).collect();
        let outcome = self
            .engine
            .decide_and_target(&lengths, &self.winning, self.attempts)?;

        log::info!(
            "[Spin] #{} attempt {}/{} -> {} {:?}",
            spin_id,
            self.attempts.current_attempt + 1,
            self.attempts.attempts_to_win,
            if outcome.is_win { "win" } else { "lose" },
            outcome.stop_indices
        );

        self.emit(MachineEvent::SpinStarted { spin_id });
        for reel in &mut self.reels {
            reel.spin();
        }
        tokio::time::sleep(self.config.timing.warmup()).await;

        let mut stops = Vec::with_capacity(self.reels.len());
        for (reel, &target) in self.reels.iter_mut().zip(&outcome.stop_indices) {
            if !reel.is_spinning() {
                log::warn!("[Spin] Reel {} is not spinning; skipping stop", reel.index());
                continue;
            }
            reel.stop(target).await?;
            stops.push(ReelStopRecord {
                reel: reel.index(),
                index: target,
                stopped_at: Instant::now(),
            });
            let _ = self.events.send(MachineEvent::ReelStopped {
                reel: reel.index(),
                index: target,
            });
            tokio::time::sleep(self.config.timing.inter_reel()).await;
        }

        self.attempts = outcome.attempt_state;

        if outcome.is_win {
            self.signals.dispatch(ArduinoSignal::Win);
            self.emit(MachineEvent::Won {
                story_id: self.current.story_id.clone(),
            });
            self.content_spent = true;
            if self.config.kiosk {
                self.schedule_playback();
            }
        } else {
            self.signals.dispatch(ArduinoSignal::Idle);
            self.emit(MachineEvent::Lost);
        }

        Ok(PlayReport {
            spin_id,
            is_win: outcome.is_win,
            stop_indices: outcome.stop_indices,
            attempt_state: self.attempts,
            stops,
        })
    }

    /// Move on to the next unit; the outgoing story is always reported as
    /// cancelled, whether or not its playback had started
    fn advance_content(&mut self) -> SlotResult<()> {
        self.telemetry(TelemetryEvent::StoryCancelled {
            story_id: self.current.story_id.clone(),
            storyline: self.current.storyline.clone(),
        });

        let unit = self.content.fetch_next_unit()?;
        self.apply_unit(&unit)?;
        self.content_spent = false;

        log::info!(
            "[Spin] Content advanced to '{}' ({})",
            self.current.story_id,
            self.current.storyline
        );
        self.emit(MachineEvent::ContentAdvanced {
            story_id: self.current.story_id.clone(),
            storyline: self.current.storyline.clone(),
        });
        Ok(())
    }

    fn apply_unit(&mut self, unit: &ContentUnit) -> SlotResult<()> {
        if unit.layout.reel_count() != self.reels.len() {
            return Err(SlotError::ReelCountMismatch {
                expected: self.reels.len(),
                actual: unit.layout.reel_count(),
            });
        }
        let winning = unit.winning_indices()?;

        for (reel, column) in self.reels.iter_mut().zip(&unit.layout.columns) {
            reel.load(column);
        }
        self.winning = winning;
        self.current = StoryRef::of(unit);
        self.story_played = Arc::new(AtomicBool::new(false));
        Ok(())
    }

    fn schedule_playback(&mut self) {
        let delay = self.config.timing.play_after_win();
        let played = self.story_played.clone();
        let events = self.events.clone();
        let story = self.current.clone();

        log::debug!("[Spin] Story playback in {}ms", delay.as_millis());
        self.pending_playback = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mark_story_played(&played, &events, &story);
        }));
    }

    fn cancel_pending_playback(&mut self) {
        if let Some(handle) = self.pending_playback.take() {
            handle.abort();
        }
    }

    fn telemetry(&self, event: TelemetryEvent) {
        self.emit(MachineEvent::Telemetry(event));
    }

    fn emit(&self, event: MachineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SpinOrchestrator {
    fn drop(&mut self) {
        self.cancel_pending_playback();
    }
}

fn mark_story_played(
    played: &AtomicBool,
    events: &broadcast::Sender<MachineEvent>,
    story: &StoryRef,
) {
    if played.swap(true, Ordering::AcqRel) {
        return;
    }
    log::info!("[Spin] Playing story '{}'", story.story_id);
    let _ = events.send(MachineEvent::Telemetry(TelemetryEvent::StoryPlayed {
        story_id: story.story_id.clone(),
        storyline: story.storyline.clone(),
    }));
}

// ═══════════════════════════════════════════════════════════════════════════
// SLOT MACHINE
// ═══════════════════════════════════════════════════════════════════════════

/// Shared handle that rejects overlapping plays
#[derive(Clone)]
pub struct SlotMachine {
    inner: Arc<tokio::sync::Mutex<SpinOrchestrator>>,
    events: broadcast::Sender<MachineEvent>,
}

impl SlotMachine {
    pub fn new(orchestrator: SpinOrchestrator) -> Self {
        let events = orchestrator.events.clone();
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(orchestrator)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MachineEvent> {
        self.events.subscribe()
    }

    /// Whether a play is in progress
    pub fn is_running(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Run a play, or return `None` if one is already running
    pub async fn request_play(&self, advance_content: bool) -> SlotResult<Option<PlayReport>> {
        let Ok(mut orchestrator) = self.inner.try_lock() else {
            log::info!("[Spin] Play already running; request ignored");
            return Ok(None);
        };
        orchestrator.play(advance_content).await.map(Some)
    }

    pub async fn attempt_state(&self) -> AttemptState {
        self.inner.lock().await.attempt_state()
    }

    pub async fn announce_idle(&self) {
        self.inner.lock().await.announce_idle();
    }
}
