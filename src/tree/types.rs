//! Content tree data types
//!
//! Defines the four node levels and their payloads:
//! - `NodeKind`: course, section, lesson, step
//! - `Payload`: level-specific content sent to the remote platform
//! - `Node`: a persisted node with its local and remote linkage

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Level of a node in the content tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Course,
    Section,
    Lesson,
    Step,
}

impl NodeKind {
    /// All levels, root first
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Course,
        NodeKind::Section,
        NodeKind::Lesson,
        NodeKind::Step,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Course => "course",
            NodeKind::Section => "section",
            NodeKind::Lesson => "lesson",
            NodeKind::Step => "step",
        }
    }

    /// Collection name used by the remote API
    pub fn plural(&self) -> &'static str {
        match self {
            NodeKind::Course => "courses",
            NodeKind::Section => "sections",
            NodeKind::Lesson => "lessons",
            NodeKind::Step => "steps",
        }
    }

    /// Level directly above this one
    pub fn parent(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Course => None,
            NodeKind::Section => Some(NodeKind::Course),
            NodeKind::Lesson => Some(NodeKind::Section),
            NodeKind::Step => Some(NodeKind::Lesson),
        }
    }

    /// Level directly below this one
    pub fn child(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Course => Some(NodeKind::Section),
            NodeKind::Section => Some(NodeKind::Lesson),
            NodeKind::Lesson => Some(NodeKind::Step),
            NodeKind::Step => None,
        }
    }

    /// Whether remote creation of this level can be interrupted by a challenge
    pub fn may_require_challenge(&self) -> bool {
        matches!(self, NodeKind::Course | NodeKind::Lesson)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown node kind: {0}")]
pub struct ParseKindError(String);

impl FromStr for NodeKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(NodeKind::Course),
            "section" => Ok(NodeKind::Section),
            "lesson" => Ok(NodeKind::Lesson),
            "step" => Ok(NodeKind::Step),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoursePayload {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonPayload {
    pub title: String,
    #[serde(default)]
    pub cost: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    /// Step type understood by the remote platform ("text", "choice", ...)
    #[serde(default = "default_block")]
    pub block: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub cost: i32,
}

fn default_block() -> String {
    "text".to_string()
}

/// Level-specific content of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Course(CoursePayload),
    Section(SectionPayload),
    Lesson(LessonPayload),
    Step(StepPayload),
}

impl Payload {
    pub fn kind(&self) -> NodeKind {
        match self {
            Payload::Course(_) => NodeKind::Course,
            Payload::Section(_) => NodeKind::Section,
            Payload::Lesson(_) => NodeKind::Lesson,
            Payload::Step(_) => NodeKind::Step,
        }
    }

    /// Human readable label, used in logs
    pub fn label(&self) -> &str {
        match self {
            Payload::Course(c) => &c.title,
            Payload::Section(s) => &s.title,
            Payload::Lesson(l) => &l.title,
            Payload::Step(s) => &s.text,
        }
    }
}

/// A node of the local content tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "localId")]
    pub local_id: i64,
    /// Remote platform id, `None` until the node has been created remotely
    #[serde(rename = "remoteId")]
    pub remote_id: Option<i64>,
    /// Local id of the parent, `None` only for courses
    #[serde(rename = "parentId")]
    pub parent_id: Option<i64>,
    /// 1-based position among siblings
    pub position: i32,
    pub payload: Payload,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub fn is_synced(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Request to create a node locally
#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<i64>,
    /// Explicit insert position; appended after the last sibling when absent
    #[serde(default)]
    pub position: Option<i32>,
    pub payload: Payload,
}

impl NewNode {
    pub fn append(parent_id: Option<i64>, payload: Payload) -> Self {
        Self {
            parent_id,
            position: None,
            payload,
        }
    }

    pub fn at(parent_id: Option<i64>, position: i32, payload: Payload) -> Self {
        Self {
            parent_id,
            position: Some(position),
            payload,
        }
    }
}

/// Where a pulled node attaches in the local tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulledParent {
    /// An existing local node (or no parent for courses)
    Local(Option<i64>),
    /// An earlier entry of the same pulled batch
    Pulled(usize),
}

/// A node discovered on the remote platform, ready to be saved locally
#[derive(Debug, Clone, PartialEq)]
pub struct PulledNode {
    /// Local node already linked to this remote id, if any
    pub existing: Option<i64>,
    pub remote_id: i64,
    pub parent: PulledParent,
    pub position: i32,
    pub payload: Payload,
}
