// Local entity records mirrored from the remote service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved article. `article_id` is the server-assigned id; `id` is the local
/// row id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub article_id: i64,
    pub url: String,
    pub origin_url: Option<String>,
    pub title: String,
    pub archived: bool,
    pub favorite: bool,
    /// Reading progress, 0..=100.
    pub progress: f64,
    pub updated_at: DateTime<Utc>,
}

/// A tag label. `tag_id` is the server id, absent for tags created offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub tag_id: Option<i64>,
    pub label: String,
}

/// Selection anchor of an annotation inside the article body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnotationRange {
    pub start: String,
    pub end: String,
    pub start_offset: i64,
    pub end_offset: i64,
}

/// A highlight with an optional note. `annotation_id` is the server id, absent
/// until the annotation has been uploaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub id: i64,
    pub annotation_id: Option<i64>,
    /// Local row id of the owning article.
    pub article_local_id: i64,
    pub text: String,
    pub quote: Option<String>,
    pub ranges: Vec<AnnotationRange>,
}

/// Annotation created locally, before it has any id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAnnotation {
    pub text: String,
    pub quote: Option<String>,
    #[serde(default)]
    pub ranges: Vec<AnnotationRange>,
}
