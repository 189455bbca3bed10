// ============================================================
// Layer 3 — Conversation Domain Types
// ============================================================
// A ConversationSession is a bounded conversational context tied
// to one user: an ordered turn history plus a reference to the
// model artifact currently answering for that user.
//
// Sessions are owned exclusively by the session manager; these
// structs carry no locking themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One exchange step inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,

    /// Style similarity of a generated turn against the active
    /// profile; `None` for user turns
    pub style_similarity: Option<f32>,

    /// Set when the turn was kept despite scoring below the
    /// drift threshold
    pub drift_warning: bool,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            style_similarity: None,
            drift_warning: false,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, similarity: f32, drift_warning: bool) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            style_similarity: Some(similarity),
            drift_warning,
            timestamp: Utc::now(),
        }
    }
}

/// Per-user conversational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub user_id: String,

    /// Version of the artifact answering for this session.
    /// Refreshed at the start of each reply, never mid-generation.
    pub active_artifact_version: u32,

    /// Ordered turns, oldest first, truncated to the configured
    /// max context turns after every append
    pub turn_history: Vec<Turn>,

    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    /// Append a turn and drop the oldest entries beyond `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turn_history.push(turn);
        if self.turn_history.len() > max_turns {
            let excess = self.turn_history.len() - max_turns;
            self.turn_history.drain(..excess);
        }
        self.last_activity = Utc::now();
    }
}

/// What the session manager hands back to an adapter for one reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,

    /// Bounded similarity of the reply against the active profile
    pub style_similarity: f32,

    /// True when the reply was kept despite drifting below the
    /// configured threshold — observability only, never fatal
    pub drift_warning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        ConversationSession {
            session_id: "s".into(),
            user_id: "u".into(),
            active_artifact_version: 1,
            turn_history: Vec::new(),
            opened_at: Utc::now(),
            last_activity: Utc::now(),
        }
    }

    #[test]
    fn test_push_turn_bounds_history() {
        let mut s = session();
        for i in 0..10 {
            s.push_turn(Turn::user(format!("m{i}")), 4);
        }
        assert_eq!(s.turn_history.len(), 4);
        // Oldest dropped first
        assert_eq!(s.turn_history[0].text, "m6");
        assert_eq!(s.turn_history[3].text, "m9");
    }
}
