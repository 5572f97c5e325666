//! Error taxonomy (§6 return codes, §7 error handling). A plain enum with a
//! hand-rolled `Display`, matching the teacher's `sounderror.rs` rather than
//! reaching for `thiserror`.

use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReturnCode {
    Ok = 0,
    UnknownNodeType = 1,
    NodeNotFound = 2,
    NodeAlreadyExists = 3,
    NodeTypeAlreadyExists = 4,
    InvalidPropertyType = 5,
    InvalidPropertyValue = 6,
    InvariantViolation = 7,
    InvalidInstructionFormat = 8,
}

/// What a node's own `set_property` can go wrong with (§4.2). Carries no
/// `NodeId` because a node never knows its own id — the runtime is the one
/// that knows which node it just called, so it wraps this into the
/// `NodeId`-carrying [`GraphError`] variants at the `SET_PROPERTY` call
/// site (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyError {
    InvalidType,
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    UnknownNodeType(String),
    NodeNotFound(NodeId),
    NodeAlreadyExists(NodeId),
    NodeTypeAlreadyExists(String),
    InvalidPropertyType { node: NodeId, key: String },
    InvalidPropertyValue { node: NodeId, key: String, reason: String },
    InvariantViolation(String),
    InvalidInstructionFormat(String),
}

impl GraphError {
    /// Project this error onto the wire-facing integer code (§6).
    pub fn code(&self) -> ReturnCode {
        match self {
            GraphError::UnknownNodeType(_) => ReturnCode::UnknownNodeType,
            GraphError::NodeNotFound(_) => ReturnCode::NodeNotFound,
            GraphError::NodeAlreadyExists(_) => ReturnCode::NodeAlreadyExists,
            GraphError::NodeTypeAlreadyExists(_) => ReturnCode::NodeTypeAlreadyExists,
            GraphError::InvalidPropertyType { .. } => ReturnCode::InvalidPropertyType,
            GraphError::InvalidPropertyValue { .. } => ReturnCode::InvalidPropertyValue,
            GraphError::InvariantViolation(_) => ReturnCode::InvariantViolation,
            GraphError::InvalidInstructionFormat(_) => ReturnCode::InvalidInstructionFormat,
        }
    }
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::UnknownNodeType(t) => write!(f, "unknown node type \"{t}\""),
            GraphError::NodeNotFound(id) => write!(f, "node {id:?} not found"),
            GraphError::NodeAlreadyExists(id) => write!(f, "node {id:?} already exists"),
            GraphError::NodeTypeAlreadyExists(t) => {
                write!(f, "node type \"{t}\" is already registered")
            }
            GraphError::InvalidPropertyType { node, key } => {
                write!(f, "node {node:?} property \"{key}\" has an invalid type")
            }
            GraphError::InvalidPropertyValue { node, key, reason } => {
                write!(f, "node {node:?} property \"{key}\": {reason}")
            }
            GraphError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            GraphError::InvalidInstructionFormat(msg) => {
                write!(f, "malformed instruction: {msg}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_projection_matches_wire_return_codes() {
        assert_eq!(
            GraphError::NodeNotFound(NodeId::new(1)).code(),
            ReturnCode::NodeNotFound
        );
        assert_eq!(ReturnCode::Ok as i32, 0);
        assert_eq!(ReturnCode::InvalidInstructionFormat as i32, 8);
    }
}
