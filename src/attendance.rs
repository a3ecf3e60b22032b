//! Turning a recognition result into a presence record for one moment of an event.

use anyhow::Result;
use serde::Serialize;

use crate::matcher::MatchResult;

/// The slice of the event/participant/presence store that attendance marking needs.
///
/// Participants are looked up by name, which is also their gallery identity.
pub trait AttendanceBook {
    /// Id of the participant called `name` if they are linked to `event_id`
    fn participant_in_event(&self, event_id: i64, name: &str) -> Result<Option<i64>>;
    fn is_present(&self, moment_id: i64, participant_id: i64) -> Result<bool>;
    fn record_presence(&mut self, moment_id: i64, participant_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Recorded { name: String },
    AlreadyPresent { name: String },
    /// Recognised, but not registered for this event
    NotInEvent { name: String },
    NotRecognized { result: MatchResult },
}

/// Record presence for a recognised participant, at most once per moment.
pub fn mark_attendance<B: AttendanceBook + ?Sized>(
    book: &mut B,
    event_id: i64,
    moment_id: i64,
    result: &MatchResult,
) -> Result<AttendanceOutcome> {
    let Some(name) = result.identity() else {
        return Ok(AttendanceOutcome::NotRecognized {
            result: result.clone(),
        });
    };
    let name = name.to_string();

    let Some(participant_id) = book.participant_in_event(event_id, &name)? else {
        return Ok(AttendanceOutcome::NotInEvent { name });
    };

    if book.is_present(moment_id, participant_id)? {
        return Ok(AttendanceOutcome::AlreadyPresent { name });
    }

    book.record_presence(moment_id, participant_id)?;
    log::info!("Presence recorded for {} at moment {}", name, moment_id);
    Ok(AttendanceOutcome::Recorded { name })
}
