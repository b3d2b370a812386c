/// Document Paths
///
/// Hierarchical paths of the form `collection/doc/collection/doc`. A document
/// path always has an even number of segments, a collection path an odd one.
///
/// Persisted layout:
/// - `users/{uid}`                      user record (totalPoints)
/// - `users/{uid}/rewards/{rewardId}`   reward record
/// - `users/{uid}/claims/{claimId}`     claim record (rewardRef)

use std::fmt;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const USERS_COLLECTION: &str = "users";
pub const REWARDS_COLLECTION: &str = "rewards";
pub const CLAIMS_COLLECTION: &str = "claims";

/// Legacy reward layout, used to recover the owner of rewards written before
/// `ownerUid` was stored on the record.
static OWNER_FROM_REWARD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^users/([^/]+)/rewards/").expect("owner path pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("Path '{0}' does not point to a document (expected an even number of segments)")]
    NotADocument(String),

    #[error("Invalid path segment: '{0}'")]
    InvalidSegment(String),
}

/// Path to a single document, e.g. `users/u1/rewards/r1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    segments: Vec<String>,
}

/// Path to a collection, e.g. `users/u1/claims`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    parent: Option<DocumentPath>,
    id: String,
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

impl DocumentPath {
    /// Parse a slash separated document path. Leading and trailing slashes
    /// are not accepted, nor are empty segments.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let segments: Vec<String> = raw.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        if segments.len() % 2 != 0 {
            return Err(PathError::NotADocument(raw.to_string()));
        }

        Ok(Self { segments })
    }

    /// `users/{uid}`
    pub fn user(uid: &str) -> Result<Self, PathError> {
        validate_segment(uid)?;
        Ok(Self {
            segments: vec![USERS_COLLECTION.to_string(), uid.to_string()],
        })
    }

    /// Document id (last segment).
    pub fn id(&self) -> &str {
        // Parsing guarantees at least two segments.
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        let len = self.segments.len();
        let parent = if len > 2 {
            Some(DocumentPath {
                segments: self.segments[..len - 2].to_vec(),
            })
        } else {
            None
        };
        CollectionPath {
            parent,
            id: self.segments[len - 2].clone(),
        }
    }

    /// Sub-collection of this document.
    pub fn collection(&self, id: &str) -> Result<CollectionPath, PathError> {
        validate_segment(id)?;
        Ok(CollectionPath {
            parent: Some(self.clone()),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl CollectionPath {
    /// Top-level collection.
    pub fn root(id: &str) -> Result<Self, PathError> {
        validate_segment(id)?;
        Ok(Self {
            parent: None,
            id: id.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&DocumentPath> {
        self.parent.as_ref()
    }

    /// Document inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentPath, PathError> {
        validate_segment(id)?;
        let mut segments = self
            .parent
            .as_ref()
            .map(|p| p.segments.clone())
            .unwrap_or_default();
        segments.push(self.id.clone());
        segments.push(id.to_string());
        Ok(DocumentPath { segments })
    }

    /// True when `doc` is a direct child of this collection.
    pub fn contains(&self, doc: &DocumentPath) -> bool {
        doc.parent() == *self
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Extract the owner uid from a raw `users/{uid}/rewards/...` path.
///
/// Returns None when the path does not follow the per-user reward layout.
pub fn owner_from_reward_path(raw: &str) -> Option<&str> {
    OWNER_FROM_REWARD_PATH
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_path() {
        let path = DocumentPath::parse("users/u1/rewards/r1").unwrap();
        assert_eq!(path.id(), "r1");
        assert_eq!(path.segments().len(), 4);
        assert_eq!(path.to_string(), "users/u1/rewards/r1");
        assert_eq!(path.parent().to_string(), "users/u1/rewards");
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert_eq!(DocumentPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            DocumentPath::parse("users/u1/rewards"),
            Err(PathError::NotADocument(_))
        ));
        assert!(matches!(
            DocumentPath::parse("users//rewards/r1"),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            DocumentPath::parse("/users/u1"),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            DocumentPath::parse("users/.."),
            Err(PathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_parse_keeps_padding() {
        // Whitespace is part of the id, not trimmed away
        let padded = DocumentPath::parse("users/u1/rewards/r1 ").unwrap();
        assert_eq!(padded.id(), "r1 ");
        assert_ne!(padded, DocumentPath::parse("users/u1/rewards/r1").unwrap());

        let leading = DocumentPath::parse(" users/u1/rewards/r1").unwrap();
        assert_eq!(leading.segments()[0], " users");
        assert_eq!(owner_from_reward_path(&leading.to_string()), None);
    }

    #[test]
    fn test_collection_paths() {
        let user = DocumentPath::user("u1").unwrap();
        let claims = user.collection(CLAIMS_COLLECTION).unwrap();
        assert_eq!(claims.to_string(), "users/u1/claims");

        let claim = claims.doc("c1").unwrap();
        assert_eq!(claim.to_string(), "users/u1/claims/c1");
        assert!(claims.contains(&claim));

        let other = DocumentPath::parse("users/u2/claims/c1").unwrap();
        assert!(!claims.contains(&other));

        let root = CollectionPath::root(USERS_COLLECTION).unwrap();
        assert!(root.contains(&user));
        assert_eq!(user.parent(), root);
    }

    #[test]
    fn test_user_rejects_slash() {
        assert!(DocumentPath::user("a/b").is_err());
        assert!(DocumentPath::user("").is_err());
    }

    #[test]
    fn test_owner_from_reward_path() {
        assert_eq!(owner_from_reward_path("users/abc123/rewards/r1"), Some("abc123"));
        assert_eq!(owner_from_reward_path("rewards/r1"), None);
        assert_eq!(owner_from_reward_path("users/abc123/claims/c1"), None);
        assert_eq!(owner_from_reward_path("teams/t1/rewards/r1"), None);
    }
}
