//! Resources: artifacts produced and consumed by task executions

use crate::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Resource Identifier ──────────────────────────────────────────────

/// Unique identifier for a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Resource ─────────────────────────────────────────────────────────

/// An artifact in the workflow arena: a document, dataset, file
/// reference, or any other output a downstream task can consume
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier
    pub id: ResourceId,
    /// Short human-readable name
    pub name: String,
    /// What this artifact contains
    pub description: String,
    /// Inline content, when the artifact is small enough to embed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Path to on-disk content, when not embedded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// MIME type hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Content size in bytes, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Execution that produced this artifact, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<ExecutionId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ResourceId::generate(),
            name: name.into(),
            description: description.into(),
            content: None,
            file_path: None,
            mime_type: None,
            size_bytes: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.size_bytes = Some(content.len() as u64);
        self.content = Some(content);
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

// ── Resource Draft ───────────────────────────────────────────────────

/// A resource as described by a worker before it is committed to the
/// arena. The engine assigns the id and provenance on materialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDraft {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: None,
            mime_type: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Commit the draft into a full resource attributed to an execution
    pub fn into_resource(self, created_by: ExecutionId) -> Resource {
        let size = self.content.as_ref().map(|c| c.len() as u64);
        Resource {
            id: ResourceId::generate(),
            name: self.name,
            description: self.description,
            content: self.content,
            file_path: None,
            mime_type: self.mime_type,
            size_bytes: size,
            created_by: Some(created_by),
            created_at: Utc::now(),
        }
    }
}
