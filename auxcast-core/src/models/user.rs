use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::UserId;

/// Account record, as much of it as discovery needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Genre labels attached to the curator, stored as TEXT[]
    pub genre_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            display_name: display_name.into(),
            genre_tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_genres(mut self, tags: &[&str]) -> Self {
        self.genre_tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Case-insensitive genre membership check used by the discovery filter
    #[must_use]
    pub fn has_genre(&self, tag: &str) -> bool {
        self.genre_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Curator fields embedded in discovery feed items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorSummary {
    pub id: UserId,
    pub display_name: String,
    pub genre_tags: Vec<String>,
}

impl From<&User> for CuratorSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            genre_tags: user.genre_tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_genre_case_insensitive() {
        let user = User::new("dj marrow").with_genres(&["Ambient", "idm"]);
        assert!(user.has_genre("ambient"));
        assert!(user.has_genre("IDM"));
        assert!(!user.has_genre("dub"));
    }
}
