//! Tree construction and snapshot errors.

/// Errors building a tree from mission steps.
///
/// A failed build never leaves a partially constructed tree behind.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  /// Step-type tag with no registered handler.
  #[error("unknown step type '{tag}'")]
  UnknownStepType { tag: String },

  /// A step's parameters were rejected by its handler.
  #[error("invalid step '{label}': {message}")]
  InvalidStep { label: String, message: String },
}

/// Errors reconstructing a tree from a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
  /// Node-type tag with no registered constructor.
  #[error("unknown node type '{tag}'")]
  UnknownNodeType { tag: String },

  /// Persisted parameters could not be decoded.
  #[error("malformed parameters for node type '{tag}': {message}")]
  MalformedParams { tag: String, message: String },

  /// The persisted structure disagrees with a freshly built tree for the
  /// same mission definition.
  #[error("snapshot does not match the mission definition: {message}")]
  TreeIntegrity { message: String },
}
