//! Feedback interface: route a verdict on a turn to its memory entry.

use recall_core::error::{RecallError, Result};
use recall_core::types::TurnId;
use tracing::{debug, info};

use crate::services::RouterServices;

impl RouterServices {
    /// Apply positive or negative feedback to the memory entry behind a
    /// turn, returning the entry's new effectiveness.
    ///
    /// Returns `Ok(None)` for turns that never produced an entry.
    ///
    /// # Errors
    /// [`RecallError::TurnNotFound`] for unknown turns,
    /// [`RecallError::EntryNotFound`] if the entry was cleaned up since, and
    /// backend failures.
    pub fn provide_feedback(&self, turn_id: TurnId, positive: bool) -> Result<Option<f32>> {
        let turn = self
            .backend()
            .get_turn(turn_id)?
            .ok_or(RecallError::TurnNotFound(turn_id))?;

        let Some(entry_id) = turn.memory_id else {
            debug!(turn = %turn_id, "Feedback on a turn without a memory entry");
            return Ok(None);
        };

        let effectiveness = self.memory.decay_or_boost(entry_id, positive)?;
        info!(turn = %turn_id, entry = %entry_id, positive, effectiveness, "Feedback recorded");
        Ok(Some(effectiveness))
    }
}
