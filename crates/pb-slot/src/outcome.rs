//! Outcome Engine: forced-win cadence and stop targets
//!
//! The house lets the player win on a randomly chosen attempt (1–3). Every
//! other spin lands on a combination that is visibly different from the
//! winning layout.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{SlotError, SlotResult};

/// Upper bound for the forced-win cadence
pub const MAX_ATTEMPTS_TO_WIN: u8 = 3;

/// Whole-combination redraws before falling back to a deterministic nudge
const MAX_RESAMPLES: u32 = 1000;

/// Attempt counters carried across spins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptState {
    /// Spin number (1-based) on which the player wins
    pub attempts_to_win: u8,
    /// Spins played since the last win
    pub current_attempt: u32,
}

impl AttemptState {
    pub fn new(attempts_to_win: u8) -> Self {
        Self {
            attempts_to_win: attempts_to_win.clamp(1, MAX_ATTEMPTS_TO_WIN),
            current_attempt: 0,
        }
    }

    /// Whether the next spin is the forced win
    pub fn next_is_win(&self) -> bool {
        self.current_attempt + 1 == self.attempts_to_win as u32
    }
}

/// Result of one decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub is_win: bool,
    pub stop_indices: Vec<usize>,
    pub attempt_state: AttemptState,
}

/// Win/lose decision and stop target generation
pub struct OutcomeEngine {
    rng: StdRng,
}

impl OutcomeEngine {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Seed RNG for reproducible results
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw from 1..=3
    pub fn roll_attempts_to_win(&mut self) -> u8 {
        self.rng.random_range(1..=MAX_ATTEMPTS_TO_WIN)
    }

    /// Counters for a fresh session
    pub fn fresh_attempt_state(&mut self) -> AttemptState {
        AttemptState::new(self.roll_attempts_to_win())
    }

    /// Decide the current attempt and compute one stop index per reel
    pub fn decide_and_target(
        &mut self,
        reel_lengths: &[usize],
        winning_indices: &[usize],
        state: AttemptState,
    ) -> SlotResult<Outcome> {
        validate(reel_lengths, winning_indices)?;

        let degenerate = reel_lengths.iter().all(|&len| len == 1);
        if degenerate && !state.next_is_win() {
            // Every reel has a single bag; no losing layout exists
            log::warn!("[Outcome] All reels hold one bag; delivering the win early");
        }

        if state.next_is_win() || degenerate {
            return Ok(Outcome {
                is_win: true,
                stop_indices: winning_indices.to_vec(),
                attempt_state: self.fresh_attempt_state(),
            });
        }

        Ok(Outcome {
            is_win: false,
            stop_indices: self.losing_combination(reel_lengths, winning_indices),
            attempt_state: AttemptState {
                attempts_to_win: state.attempts_to_win,
                current_attempt: state.current_attempt + 1,
            },
        })
    }

    /// Redraw whole combinations until one differs from the winning layout
    fn losing_combination(&mut self, reel_lengths: &[usize], winning_indices: &[usize]) -> Vec<usize> {
        for _ in 0..MAX_RESAMPLES {
            let candidate: Vec<usize> = reel_lengths
                .iter()
                .map(|&len| self.rng.random_range(0..len))
                .collect();
            if candidate != winning_indices {
                return candidate;
            }
        }

        log::warn!(
            "[Outcome] No losing combination after {} draws; nudging first multi-bag reel",
            MAX_RESAMPLES
        );
        let mut nudged = winning_indices.to_vec();
        if let Some(reel) = reel_lengths.iter().position(|&len| len > 1) {
            nudged[reel] = (nudged[reel] + 1) % reel_lengths[reel];
        }
        nudged
    }
}

impl Default for OutcomeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(reel_lengths: &[usize], winning_indices: &[usize]) -> SlotResult<()> {
    if reel_lengths.len() != winning_indices.len() {
        return Err(SlotError::ReelCountMismatch {
            expected: reel_lengths.len(),
            actual: winning_indices.len(),
        });
    }
    for (reel, (&len, &index)) in reel_lengths.iter().zip(winning_indices).enumerate() {
        if len == 0 {
            return Err(SlotError::EmptyReel { reel });
        }
        if index >= len {
            return Err(SlotError::WinningIndexOutOfRange { reel, index, len });
        }
    }
    Ok(())
}
