// Offline change records: one durably queued description of a local mutation
// awaiting remote replay.
//
// The record kinds form a closed set. Both the queue's coalescing logic and the
// sync replay match on `ChangeRecord` exhaustively, so adding a kind forces
// both sides to handle it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Article field that an `ArticleChange` record pushes to the server.
///
/// Declaration order is the replay order inside a single change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleChangeType {
    Archive,
    Favorite,
    Title,
    Tags,
}

impl ArticleChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Favorite => "favorite",
            Self::Title => "title",
            Self::Tags => "tags",
        }
    }
}

impl fmt::Display for ArticleChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown article change type: {0}")]
pub struct UnknownChangeType(pub String);

impl FromStr for ArticleChangeType {
    type Err = UnknownChangeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(Self::Archive),
            "favorite" => Ok(Self::Favorite),
            "title" => Ok(Self::Title),
            "tags" => Ok(Self::Tags),
            other => Err(UnknownChangeType(other.to_string())),
        }
    }
}

/// Set of pending field changes for one article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeSet<ArticleChangeType>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(change: ArticleChangeType) -> Self {
        let mut set = Self::new();
        set.insert(change);
        set
    }

    /// Adds a change type. Returns `false` if it was already present.
    pub fn insert(&mut self, change: ArticleChangeType) -> bool {
        self.0.insert(change)
    }

    /// Unions `other` into `self`. Returns `true` if anything was added.
    pub fn merge(&mut self, other: &ChangeSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }

    pub fn contains(&self, change: ArticleChangeType) -> bool {
        self.0.contains(&change)
    }

    pub fn iter(&self) -> impl Iterator<Item = ArticleChangeType> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ArticleChangeType> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ArticleChangeType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Discriminant of a `ChangeRecord`, stored in its own column so the queue can
/// look records up by kind without decoding payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    AddLink,
    ArticleChange,
    TagsDelete,
    AnnotationAdd,
    AnnotationUpdate,
    AnnotationDelete,
    ArticleDelete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddLink => "add_link",
            Self::ArticleChange => "article_change",
            Self::TagsDelete => "tags_delete",
            Self::AnnotationAdd => "annotation_add",
            Self::AnnotationUpdate => "annotation_update",
            Self::AnnotationDelete => "annotation_delete",
            Self::ArticleDelete => "article_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add_link" => Some(Self::AddLink),
            "article_change" => Some(Self::ArticleChange),
            "tags_delete" => Some(Self::TagsDelete),
            "annotation_add" => Some(Self::AnnotationAdd),
            "annotation_update" => Some(Self::AnnotationUpdate),
            "annotation_delete" => Some(Self::AnnotationDelete),
            "article_delete" => Some(Self::ArticleDelete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation awaiting replay against the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRecord {
    AddLink {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_url: Option<String>,
    },
    ArticleChange {
        article_id: i64,
        changes: ChangeSet,
    },
    TagsDelete {
        article_id: i64,
        tag_ids: Vec<String>,
    },
    AnnotationAdd {
        article_id: i64,
        local_annotation_id: i64,
    },
    AnnotationUpdate {
        article_id: i64,
        local_annotation_id: i64,
    },
    AnnotationDelete {
        article_id: i64,
        remote_annotation_id: i64,
    },
    ArticleDelete {
        article_id: i64,
    },
}

impl ChangeRecord {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::AddLink { .. } => ChangeKind::AddLink,
            Self::ArticleChange { .. } => ChangeKind::ArticleChange,
            Self::TagsDelete { .. } => ChangeKind::TagsDelete,
            Self::AnnotationAdd { .. } => ChangeKind::AnnotationAdd,
            Self::AnnotationUpdate { .. } => ChangeKind::AnnotationUpdate,
            Self::AnnotationDelete { .. } => ChangeKind::AnnotationDelete,
            Self::ArticleDelete { .. } => ChangeKind::ArticleDelete,
        }
    }

    /// Remote article the record targets. `AddLink` has none yet: the server
    /// assigns the id when the link is uploaded.
    pub fn article_id(&self) -> Option<i64> {
        match self {
            Self::AddLink { .. } => None,
            Self::ArticleChange { article_id, .. }
            | Self::TagsDelete { article_id, .. }
            | Self::AnnotationAdd { article_id, .. }
            | Self::AnnotationUpdate { article_id, .. }
            | Self::AnnotationDelete { article_id, .. }
            | Self::ArticleDelete { article_id } => Some(*article_id),
        }
    }

    /// Whether a remote "not found" means the intent is already satisfied.
    ///
    /// Creation (`AddLink`) never tolerates it.
    pub fn tolerates_not_found(&self) -> bool {
        !matches!(self, Self::AddLink { .. })
    }
}
