//! Content catalog: storylines, stories and bag layouts
//!
//! A storyline carries three columns of bags and a list of stories; each
//! story selects one winning bag per column. The catalog walks stories in a
//! shuffled order and reshuffles everything when it wraps around.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{SlotError, SlotResult};

/// A selectable item shown in a reel slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bag {
    pub id: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub image_frame_urls: Option<Vec<String>>,
}

impl Bag {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            image_url: String::new(),
            video_url: None,
            image_frame_urls: None,
        }
    }
}

/// A timed cue in a story's audio track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryEvent {
    /// Seconds into the track
    pub start: f64,
    #[serde(default)]
    pub stop: Option<f64>,
    pub action: String,
    #[serde(default)]
    pub bags: Option<Vec<String>>,
    #[serde(default)]
    pub frames: Option<Vec<String>>,
}

/// One story: an audio track plus the winning bag per column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub audio_src: String,
    pub selected_bags: Vec<String>,
    #[serde(default)]
    pub events: Vec<StoryEvent>,
}

/// Catalog wire shape of a storyline's three columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagColumns {
    pub first_column: Vec<Bag>,
    pub second_column: Vec<Bag>,
    pub third_column: Vec<Bag>,
}

impl BagColumns {
    fn columns(&self) -> [&Vec<Bag>; 3] {
        [&self.first_column, &self.second_column, &self.third_column]
    }
}

/// A themed set of stories sharing one bag layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryLine {
    pub title: String,
    pub bags: BagColumns,
    pub stories: Vec<Story>,
}

// ═══════════════════════════════════════════════════════════════════════════
// LAYOUT
// ═══════════════════════════════════════════════════════════════════════════

/// Per-reel bag sequences for one play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReelLayout {
    pub columns: Vec<Vec<Bag>>,
}

impl ReelLayout {
    pub fn new(columns: Vec<Vec<Bag>>) -> Self {
        Self { columns }
    }

    /// Independently shuffle each column
    pub fn shuffled<R: Rng + ?Sized>(bags: &BagColumns, rng: &mut R) -> Self {
        let columns = bags
            .columns()
            .into_iter()
            .map(|column| {
                let mut column = column.clone();
                column.shuffle(rng);
                column
            })
            .collect();
        Self { columns }
    }

    pub fn reel_count(&self) -> usize {
        self.columns.len()
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.columns.iter().map(Vec::len).collect()
    }

    /// Locate each selected bag in its column
    pub fn winning_indices(&self, selected_bags: &[String]) -> SlotResult<Vec<usize>> {
        if selected_bags.len() != self.columns.len() {
            return Err(SlotError::ReelCountMismatch {
                expected: self.columns.len(),
                actual: selected_bags.len(),
            });
        }

        self.columns
            .iter()
            .zip(selected_bags)
            .enumerate()
            .map(|(reel, (column, bag_id))| {
                column
                    .iter()
                    .position(|bag| &bag.id == bag_id)
                    .ok_or_else(|| SlotError::WinningBagMissing {
                        reel,
                        bag_id: bag_id.clone(),
                    })
            })
            .collect()
    }
}

/// What the orchestrator plays next
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub story: Story,
    pub storyline_title: String,
    pub layout: ReelLayout,
}

impl ContentUnit {
    pub fn winning_indices(&self) -> SlotResult<Vec<usize>> {
        self.layout.winning_indices(&self.story.selected_bags)
    }
}

/// Content collaborator
pub trait ContentSource: Send {
    /// Unit currently on the reels
    fn current_unit(&self) -> ContentUnit;

    /// Advance to the next unit
    fn fetch_next_unit(&mut self) -> SlotResult<ContentUnit>;
}

// ═══════════════════════════════════════════════════════════════════════════
// CATALOG
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory storyline catalog
pub struct StoryCatalog {
    storylines: Vec<StoryLine>,
    line_index: usize,
    stories: Vec<Story>,
    story_index: usize,
    layout: ReelLayout,
    rng: StdRng,
}

impl StoryCatalog {
    pub fn new(storylines: Vec<StoryLine>) -> SlotResult<Self> {
        Self::with_rng(storylines, StdRng::from_os_rng())
    }

    /// Seeded catalog for reproducible ordering
    pub fn seeded(storylines: Vec<StoryLine>, seed: u64) -> SlotResult<Self> {
        Self::with_rng(storylines, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut storylines: Vec<StoryLine>, mut rng: StdRng) -> SlotResult<Self> {
        storylines.retain(|line| !line.stories.is_empty());
        if storylines.is_empty() {
            return Err(SlotError::EmptyCatalog);
        }
        storylines.shuffle(&mut rng);

        let mut catalog = Self {
            storylines,
            line_index: 0,
            stories: Vec::new(),
            story_index: 0,
            layout: ReelLayout::default(),
            rng,
        };
        catalog.enter_storyline(0);
        Ok(catalog)
    }

    /// Parse a JSON array of storylines
    pub fn from_json(json: &str) -> SlotResult<Self> {
        let storylines: Vec<StoryLine> = serde_json::from_str(json)?;
        Self::new(storylines)
    }

    pub fn load(path: impl AsRef<Path>) -> SlotResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn storyline_count(&self) -> usize {
        self.storylines.len()
    }

    pub fn current_storyline(&self) -> &StoryLine {
        &self.storylines[self.line_index]
    }

    fn enter_storyline(&mut self, index: usize) {
        self.line_index = index;
        let line = &self.storylines[index];

        let mut stories = line.stories.clone();
        stories.shuffle(&mut self.rng);
        self.stories = stories;
        self.story_index = 0;
        self.layout = ReelLayout::shuffled(&line.bags, &mut self.rng);

        log::debug!(
            "[Catalog] Entered storyline '{}' ({} stories)",
            line.title,
            self.stories.len()
        );
    }
}

impl ContentSource for StoryCatalog {
    fn current_unit(&self) -> ContentUnit {
        ContentUnit {
            story: self.stories[self.story_index].clone(),
            storyline_title: self.current_storyline().title.clone(),
            layout: self.layout.clone(),
        }
    }

    fn fetch_next_unit(&mut self) -> SlotResult<ContentUnit> {
        if self.story_index + 1 < self.stories.len() {
            self.story_index += 1;
        } else {
            let next = if self.line_index + 1 < self.storylines.len() {
                self.line_index + 1
            } else {
                self.storylines.shuffle(&mut self.rng);
                0
            };
            self.enter_storyline(next);
        }
        Ok(self.current_unit())
    }
}
