//! In-memory user and diagram registries.
//!
//! These model the authoritative persisted state the collaboration layer
//! leans on — identity, ownership, diagram versions — without dragging a
//! database into the engine. Uniqueness and length rules match the
//! persisted schema: usernames 3–30 chars and unique, emails lowercased
//! and unique, titles ≤ 100, descriptions ≤ 500.

use charta_engine::codec::now_ms;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const TITLE_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    InvalidUsername(String),
    DuplicateUsername(String),
    DuplicateEmail(String),
    InvalidTitle(String),
    InvalidDescription(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUsername(u) => write!(f, "invalid username: {u}"),
            Self::DuplicateUsername(u) => write!(f, "username already taken: {u}"),
            Self::DuplicateEmail(e) => write!(f, "email already registered: {e}"),
            Self::InvalidTitle(t) => write!(f, "invalid diagram title: {t}"),
            Self::InvalidDescription(d) => write!(f, "description too long: {d} chars"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// A registered user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Instant,
    pub created_at: u64,
    pub updated_at: u64,
}

/// User registry with online-presence bookkeeping.
pub struct UserDirectory {
    users: HashMap<String, User>,
    /// Online users idle longer than this are flipped offline by the sweep.
    staleness: Duration,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            staleness: Duration::from_secs(5 * 60),
        }
    }

    /// Shrink the staleness window (for tests).
    pub fn with_staleness(staleness: Duration) -> Self {
        let mut directory = Self::new();
        directory.staleness = staleness;
        directory
    }

    fn validate_username(username: &str) -> Result<(), DirectoryError> {
        let len = username.chars().count();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            return Err(DirectoryError::InvalidUsername(username.to_string()));
        }
        Ok(())
    }

    /// Register a new user. Usernames and (lowercased) emails are unique.
    pub fn create_user(
        &mut self,
        id: impl Into<String>,
        username: &str,
        email: &str,
    ) -> Result<&User, DirectoryError> {
        Self::validate_username(username)?;
        let email = email.to_lowercase();
        if self.users.values().any(|u| u.username == username) {
            return Err(DirectoryError::DuplicateUsername(username.to_string()));
        }
        if self.users.values().any(|u| u.email == email) {
            return Err(DirectoryError::DuplicateEmail(email));
        }

        let id = id.into();
        let now = now_ms();
        let user = User {
            id: id.clone(),
            username: username.to_string(),
            email,
            avatar: None,
            is_online: false,
            last_seen: Instant::now(),
            created_at: now,
            updated_at: now,
        };
        self.users.insert(id.clone(), user);
        Ok(self.users.get(&id).expect("inserted above"))
    }

    /// Authentication path: known ids come back online, unknown ids get a
    /// placeholder record (the id keeps the derived email unique).
    pub fn ensure_user(&mut self, id: &str, username: &str) -> Result<(), DirectoryError> {
        Self::validate_username(username)?;
        if self.users.contains_key(id) {
            self.touch(id);
            return Ok(());
        }
        let now = now_ms();
        self.users.insert(
            id.to_string(),
            User {
                id: id.to_string(),
                username: username.to_string(),
                email: format!("{id}@users.local"),
                avatar: None,
                is_online: true,
                last_seen: Instant::now(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Refresh activity: marks online and bumps last-seen.
    pub fn touch(&mut self, id: &str) {
        if let Some(user) = self.users.get_mut(id) {
            user.is_online = true;
            user.last_seen = Instant::now();
            user.updated_at = now_ms();
        }
    }

    pub fn mark_offline(&mut self, id: &str) {
        if let Some(user) = self.users.get_mut(id) {
            user.is_online = false;
            user.updated_at = now_ms();
        }
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.users.get(id).map(|u| u.is_online).unwrap_or(false)
    }

    /// Flip idle online users offline. Returns how many were flipped.
    pub fn sweep_stale(&mut self) -> usize {
        let staleness = self.staleness;
        let mut flipped = 0;
        for user in self.users.values_mut() {
            if user.is_online && user.last_seen.elapsed() > staleness {
                user.is_online = false;
                flipped += 1;
            }
        }
        flipped
    }
}

/// A stored diagram.
#[derive(Debug, Clone)]
pub struct Diagram {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub xml: String,
    pub owner: String,
    pub collaborators: Vec<String>,
    pub is_public: bool,
    pub version: u64,
    pub last_modified: u64,
    pub created_at: u64,
}

/// Diagram registry; the version counter increments monotonically on
/// every content update.
#[derive(Default)]
pub struct DiagramRegistry {
    diagrams: HashMap<String, Diagram>,
}

impl DiagramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_diagram(
        &mut self,
        title: &str,
        owner: impl Into<String>,
    ) -> Result<&Diagram, DirectoryError> {
        if title.is_empty() || title.chars().count() > TITLE_MAX {
            return Err(DirectoryError::InvalidTitle(title.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let now = now_ms();
        let diagram = Diagram {
            id: id.clone(),
            title: title.to_string(),
            description: None,
            xml: String::new(),
            owner: owner.into(),
            collaborators: Vec::new(),
            is_public: false,
            version: 1,
            last_modified: now,
            created_at: now,
        };
        self.diagrams.insert(id.clone(), diagram);
        Ok(self.diagrams.get(&id).expect("inserted above"))
    }

    pub fn diagram(&self, id: &str) -> Option<&Diagram> {
        self.diagrams.get(id)
    }

    pub fn diagram_count(&self) -> usize {
        self.diagrams.len()
    }

    /// Replace diagram content; bumps the version.
    pub fn update_xml(&mut self, id: &str, xml: impl Into<String>) -> bool {
        match self.diagrams.get_mut(id) {
            Some(diagram) => {
                diagram.xml = xml.into();
                diagram.version += 1;
                diagram.last_modified = now_ms();
                true
            }
            None => false,
        }
    }

    pub fn set_description(&mut self, id: &str, description: &str) -> Result<bool, DirectoryError> {
        if description.chars().count() > DESCRIPTION_MAX {
            return Err(DirectoryError::InvalidDescription(
                description.chars().count().to_string(),
            ));
        }
        Ok(match self.diagrams.get_mut(id) {
            Some(diagram) => {
                diagram.description = Some(description.to_string());
                diagram.last_modified = now_ms();
                true
            }
            None => false,
        })
    }

    /// Add a collaborator; idempotent.
    pub fn add_collaborator(&mut self, id: &str, user_id: &str) -> bool {
        match self.diagrams.get_mut(id) {
            Some(diagram) => {
                if !diagram.collaborators.iter().any(|c| c == user_id) {
                    diagram.collaborators.push(user_id.to_string());
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_collaborator(&mut self, id: &str, user_id: &str) -> bool {
        match self.diagrams.get_mut(id) {
            Some(diagram) => {
                let before = diagram.collaborators.len();
                diagram.collaborators.retain(|c| c != user_id);
                diagram.collaborators.len() < before
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.diagrams.remove(id).is_some()
    }

    /// Diagrams a user can open: owned, shared, or public.
    pub fn accessible_by(&self, user_id: &str) -> Vec<&Diagram> {
        self.diagrams
            .values()
            .filter(|d| {
                d.is_public || d.owner == user_id || d.collaborators.iter().any(|c| c == user_id)
            })
            .collect()
    }
}
