//! Vote counting and outcome rules

use ras_core::{Decision, FinalVoteRecord, SessionId, SessionState, Timestamp, VoteSlot};

/// Separator between the subject and reviewer notes in the audit trail
pub const NOTE_SEPARATOR: &str = ";";

/// Counts over a session's slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub allowed: usize,
    pub rejected: usize,
    pub abstained: usize,
    pub unset: usize,
}

impl Tally {
    pub fn from_slots(slots: &[VoteSlot]) -> Self {
        let mut tally = Self::default();
        for slot in slots {
            match slot.state {
                Some(Decision::Allowed) => tally.allowed += 1,
                Some(Decision::Rejected) => tally.rejected += 1,
                Some(Decision::Abstained) => tally.abstained += 1,
                None => tally.unset += 1,
            }
        }
        tally
    }

    /// Outcome the counts would produce if the session closed now.
    ///
    /// When both sides reach the threshold, a tie or a rejection majority
    /// rejects.
    pub fn outcome(&self, threshold: usize) -> SessionState {
        let allowed = self.allowed >= threshold;
        let rejected = self.rejected >= threshold;
        match (allowed, rejected) {
            (true, true) if self.allowed <= self.rejected => SessionState::Rejected,
            (true, true) => SessionState::Allowed,
            (true, false) => SessionState::Allowed,
            (false, true) => SessionState::Rejected,
            (false, false) => SessionState::Abstained,
        }
    }

    /// `Some` once the session must close: a side reached the threshold or
    /// every slot is resolved
    pub fn decide(&self, threshold: usize) -> Option<SessionState> {
        if self.allowed < threshold && self.rejected < threshold && self.unset > 0 {
            None
        } else {
            Some(self.outcome(threshold))
        }
    }
}

/// Subject with every non-empty reviewer note appended
pub fn audit_subject(subject: &str, slots: &[VoteSlot]) -> String {
    std::iter::once(subject)
        .chain(
            slots
                .iter()
                .map(|s| s.note.trim())
                .filter(|note| !note.is_empty()),
        )
        .collect::<Vec<_>>()
        .join(NOTE_SEPARATOR)
}

/// One durable record per slot; slots nobody filled count as abstentions
pub fn final_records(id: SessionId, slots: &[VoteSlot]) -> Vec<FinalVoteRecord> {
    let created_at = Timestamp::now();
    slots
        .iter()
        .map(|slot| FinalVoteRecord {
            ras_id: id,
            voter: slot.user_id,
            state: slot.state.unwrap_or(Decision::Abstained),
            note: slot.note.clone(),
            created_at,
        })
        .collect()
}
