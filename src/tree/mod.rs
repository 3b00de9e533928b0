//! Content tree model
//!
//! Nodes are stored arena-style: each node is addressed by its local id
//! and refers to its parent by id. Traversal goes through the store.

mod types;

pub use types::{
    CoursePayload, LessonPayload, NewNode, Node, NodeKind, ParseKindError, Payload, PulledNode,
    PulledParent, SectionPayload, StepPayload,
};
