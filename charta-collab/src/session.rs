//! Per-diagram collaboration sessions: who is editing what, and where
//! their cursor is.
//!
//! A session goes inactive when its last participant leaves; inactive
//! sessions older than 24 hours are purged by the periodic sweep.

use crate::directory::UserDirectory;
use crate::protocol::ParticipantProfile;
use charta_engine::codec::now_ms;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cursor coordinates in diagram space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorPos {
    pub x: f64,
    pub y: f64,
}

/// One participant of one diagram session.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    pub user_id: String,
    pub socket_id: String,
    pub joined_at: u64,
    pub cursor: Option<CursorPos>,
}

/// The roster for one diagram.
#[derive(Debug, Clone)]
pub struct CollaborationSession {
    pub diagram_id: String,
    pub participants: Vec<ParticipantRecord>,
    pub is_active: bool,
    updated: Instant,
}

impl CollaborationSession {
    fn new(diagram_id: &str) -> Self {
        Self {
            diagram_id: diagram_id.to_string(),
            participants: Vec::new(),
            is_active: true,
            updated: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.updated = Instant::now();
    }

    pub fn participant(&self, user_id: &str) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

/// Tracks every active session and fans roster queries out to callers.
pub struct SessionCoordinator {
    sessions: HashMap<String, CollaborationSession>,
    inactive_ttl: Duration,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            inactive_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Shrink the inactive-session TTL (for tests).
    pub fn with_inactive_ttl(ttl: Duration) -> Self {
        let mut coordinator = Self::new();
        coordinator.inactive_ttl = ttl;
        coordinator
    }

    /// Add a participant, creating or reactivating the session as needed.
    /// A returning user refreshes their socket id and join time instead
    /// of appearing twice.
    pub fn add_participant(&mut self, diagram_id: &str, user_id: &str, socket_id: &str) {
        let session = self
            .sessions
            .entry(diagram_id.to_string())
            .or_insert_with(|| CollaborationSession::new(diagram_id));
        session.is_active = true;
        session.touch();

        match session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            Some(existing) => {
                existing.socket_id = socket_id.to_string();
                existing.joined_at = now_ms();
            }
            None => session.participants.push(ParticipantRecord {
                user_id: user_id.to_string(),
                socket_id: socket_id.to_string(),
                joined_at: now_ms(),
                cursor: None,
            }),
        }
    }

    /// Remove a participant; the session goes inactive at zero.
    /// Returns whether the user was present.
    pub fn remove_participant(&mut self, diagram_id: &str, user_id: &str) -> bool {
        let session = match self.sessions.get_mut(diagram_id) {
            Some(s) => s,
            None => return false,
        };
        let before = session.participants.len();
        session.participants.retain(|p| p.user_id != user_id);
        let removed = session.participants.len() < before;
        if removed {
            session.touch();
            if session.participants.is_empty() {
                session.is_active = false;
            }
        }
        removed
    }

    /// Sweep a disconnecting user out of every active session. Returns
    /// the diagram ids they were removed from.
    pub fn remove_from_all_sessions(&mut self, user_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for (diagram_id, session) in self.sessions.iter_mut() {
            if !session.is_active {
                continue;
            }
            let before = session.participants.len();
            session.participants.retain(|p| p.user_id != user_id);
            if session.participants.len() < before {
                session.touch();
                if session.participants.is_empty() {
                    session.is_active = false;
                }
                affected.push(diagram_id.clone());
            }
        }
        affected
    }

    /// Write cursor coordinates onto a participant record.
    pub fn update_cursor(&mut self, diagram_id: &str, user_id: &str, x: f64, y: f64) -> bool {
        let session = match self.sessions.get_mut(diagram_id) {
            Some(s) => s,
            None => return false,
        };
        match session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            Some(participant) => {
                participant.cursor = Some(CursorPos { x, y });
                session.touch();
                true
            }
            None => false,
        }
    }

    pub fn session(&self, diagram_id: &str) -> Option<&CollaborationSession> {
        self.sessions.get(diagram_id)
    }

    pub fn is_active(&self, diagram_id: &str) -> bool {
        self.sessions
            .get(diagram_id)
            .map(|s| s.is_active)
            .unwrap_or(false)
    }

    pub fn participant_count(&self, diagram_id: &str) -> usize {
        self.sessions
            .get(diagram_id)
            .map(|s| s.participants.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Roster with resolved user profiles for the participants_updated
    /// reply. Unknown users fall back to their id as the display name.
    pub fn participants_resolved(
        &self,
        diagram_id: &str,
        directory: &UserDirectory,
    ) -> Vec<ParticipantProfile> {
        let session = match self.sessions.get(diagram_id) {
            Some(s) => s,
            None => return Vec::new(),
        };
        session
            .participants
            .iter()
            .map(|p| {
                let user = directory.user(&p.user_id);
                ParticipantProfile {
                    user_id: p.user_id.clone(),
                    username: user
                        .map(|u| u.username.clone())
                        .unwrap_or_else(|| p.user_id.clone()),
                    email: user.map(|u| u.email.clone()),
                    avatar: user.and_then(|u| u.avatar.clone()),
                    joined_at: p.joined_at,
                    cursor: p.cursor.map(|c| (c.x, c.y)),
                }
            })
            .collect()
    }

    /// Purge inactive sessions older than the TTL. Returns how many were
    /// dropped.
    pub fn sweep(&mut self) -> usize {
        let ttl = self.inactive_ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.is_active || s.updated.elapsed() < ttl);
        before - self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_add_and_remove_participant() {
        let mut coordinator = SessionCoordinator::new();
        coordinator.add_participant("d1", "alice", "sock-1");
        coordinator.add_participant("d1", "bob", "sock-2");

        assert!(coordinator.is_active("d1"));
        assert_eq!(coordinator.participant_count("d1"), 2);

        assert!(coordinator.remove_participant("d1", "alice"));
        assert!(coordinator.is_active("d1"));
        assert!(coordinator.remove_participant("d1", "bob"));
        assert!(!coordinator.is_active("d1"));
        assert!(!coordinator.remove_participant("d1", "bob"));
    }

    #[test]
    fn test_rejoin_refreshes_socket() {
        let mut coordinator = SessionCoordinator::new();
        coordinator.add_participant("d1", "alice", "sock-1");
        coordinator.add_participant("d1", "alice", "sock-2");

        assert_eq!(coordinator.participant_count("d1"), 1);
        let session = coordinator.session("d1").unwrap();
        assert_eq!(session.participant("alice").unwrap().socket_id, "sock-2");
    }

    #[test]
    fn test_remove_from_all_sessions() {
        let mut coordinator = SessionCoordinator::new();
        coordinator.add_participant("d1", "alice", "s1");
        coordinator.add_participant("d2", "alice", "s1");
        coordinator.add_participant("d2", "bob", "s2");

        let mut affected = coordinator.remove_from_all_sessions("alice");
        affected.sort();
        assert_eq!(affected, vec!["d1".to_string(), "d2".to_string()]);
        assert!(!coordinator.is_active("d1"));
        assert!(coordinator.is_active("d2"));
    }

    #[test]
    fn test_update_cursor() {
        let mut coordinator = SessionCoordinator::new();
        coordinator.add_participant("d1", "alice", "s1");

        assert!(coordinator.update_cursor("d1", "alice", 120.5, 88.0));
        let cursor = coordinator
            .session("d1")
            .unwrap()
            .participant("alice")
            .unwrap()
            .cursor
            .unwrap();
        assert_eq!((cursor.x, cursor.y), (120.5, 88.0));

        assert!(!coordinator.update_cursor("d1", "ghost", 0.0, 0.0));
        assert!(!coordinator.update_cursor("ghost", "alice", 0.0, 0.0));
    }

    #[test]
    fn test_sweep_purges_stale_inactive() {
        let mut coordinator = SessionCoordinator::with_inactive_ttl(Duration::from_millis(10));
        coordinator.add_participant("d1", "alice", "s1");
        coordinator.add_participant("d2", "bob", "s2");
        coordinator.remove_participant("d1", "alice");

        // Too fresh to purge.
        assert_eq!(coordinator.sweep(), 0);

        sleep(Duration::from_millis(15));
        assert_eq!(coordinator.sweep(), 1);
        assert!(coordinator.session("d1").is_none());
        // Active sessions survive regardless of age.
        assert!(coordinator.session("d2").is_some());
    }

    #[test]
    fn test_participants_resolved_falls_back_to_id() {
        let mut coordinator = SessionCoordinator::new();
        coordinator.add_participant("d1", "u-unknown", "s1");
        let directory = UserDirectory::new();

        let profiles = coordinator.participants_resolved("d1", &directory);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].username, "u-unknown");
        assert!(profiles[0].email.is_none());
    }
}
