//! The conversation exchanged with the model.
//!
//! Pruning consumes the conversation and returns the pruned one, so a task
//! never shares turn storage with another task or with an in-flight request.

use tracing::debug;

use crate::types::{ActionOutcome, Role, Screenshot, Segment, Turn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// One initiator turn carrying the task text and the opening screenshot.
    pub fn seeded(task: &str, screenshot: Screenshot) -> Self {
        Self {
            turns: vec![Turn::initiator(vec![
                Segment::Text(task.to_string()),
                Segment::Image(screenshot),
            ])],
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drops action-result screenshots from all but the `keep` most recent
    /// initiator turns that carry one. Text and metadata are kept.
    pub fn prune_visual_context(mut self, keep: usize) -> Self {
        let mut seen = 0;
        let mut pruned = 0;
        for turn in self.turns.iter_mut().rev() {
            if turn.role != Role::Initiator || !carries_result_image(turn) {
                continue;
            }
            seen += 1;
            if seen > keep {
                for segment in &mut turn.segments {
                    if let Segment::ActionResult(ActionOutcome { screenshot, .. }) = segment {
                        *screenshot = None;
                    }
                }
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, keep, "pruned screenshots from older turns");
        }
        self
    }
}

fn carries_result_image(turn: &Turn) -> bool {
    turn.segments.iter().any(|segment| {
        matches!(
            segment,
            Segment::ActionResult(ActionOutcome {
                screenshot: Some(_),
                ..
            })
        )
    })
}
