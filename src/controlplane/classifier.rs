//! Remote Error Classifier
//!
//! Maps rack controller failures onto a fixed, ordered set of kinds. The
//! order decides which failure is the most useful to surface when several
//! controllers failed, and how single-target failures are reworded.

use crate::error::{Error, RemoteError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Error Kinds
// =============================================================================

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// The driver tried and reported why it failed
    ActionFailure,
    /// The driver does not implement the operation
    NotImplemented,
    /// The controller does not know the pod type
    UnknownDriverType,
    /// Anything else; never reworded
    Other,
}

impl RemoteErrorKind {
    /// Kinds in priority order, most detailed first
    pub const PRIORITY: [RemoteErrorKind; 4] = [
        RemoteErrorKind::ActionFailure,
        RemoteErrorKind::NotImplemented,
        RemoteErrorKind::UnknownDriverType,
        RemoteErrorKind::Other,
    ];

    fn matches(self, error: &RemoteError) -> bool {
        match self {
            RemoteErrorKind::ActionFailure => matches!(error, RemoteError::ActionFailure(_)),
            RemoteErrorKind::NotImplemented => matches!(error, RemoteError::NotImplemented(_)),
            RemoteErrorKind::UnknownDriverType => {
                matches!(error, RemoteError::UnknownDriverType(_))
            }
            RemoteErrorKind::Other => true,
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::ActionFailure => write!(f, "action_failure"),
            RemoteErrorKind::NotImplemented => write!(f, "not_implemented"),
            RemoteErrorKind::UnknownDriverType => write!(f, "unknown_driver_type"),
            RemoteErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Classify a failure; the first kind in priority order that matches wins
pub fn classify(error: &RemoteError) -> RemoteErrorKind {
    RemoteErrorKind::PRIORITY
        .into_iter()
        .find(|kind| kind.matches(error))
        .unwrap_or(RemoteErrorKind::Other)
}

/// Pick the most informative failure out of a set.
///
/// Kinds are checked in priority order; within a kind the lowest client ident
/// wins so the choice never depends on map iteration order.
pub fn select_representative<'a, I>(failures: I) -> Option<(&'a str, &'a RemoteError)>
where
    I: IntoIterator<Item = (&'a String, &'a RemoteError)>,
{
    let mut ordered: Vec<(&'a String, &'a RemoteError)> = failures.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    for kind in RemoteErrorKind::PRIORITY {
        if let Some(&(ident, error)) = ordered.iter().find(|(_, error)| kind.matches(error)) {
            return Some((ident.as_str(), error));
        }
    }
    None
}

// =============================================================================
// Single-Target Wrapping
// =============================================================================

/// A single-target pod operation whose failures get reworded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodOperation {
    Compose,
    Decompose,
    SendCommissioningResults { name: String, pod_id: u64 },
}

impl PodOperation {
    /// Driver method named in "does not implement" messages
    pub fn method_name(&self) -> &'static str {
        match self {
            PodOperation::Compose => "compose",
            PodOperation::Decompose => "decompose",
            PodOperation::SendCommissioningResults { .. } => "send_pod_commissioning_results",
        }
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            PodOperation::Compose => "compose",
            PodOperation::Decompose => "decompose",
            PodOperation::SendCommissioningResults { .. } => "send_commissioning_results",
        }
    }

    fn prefix(&self) -> String {
        match self {
            PodOperation::Compose => "Unable to compose machine because".to_string(),
            PodOperation::Decompose => "Unable to decompose machine because".to_string(),
            PodOperation::SendCommissioningResults { name, pod_id } => format!(
                "Unable to send commissioning results for {}({}) because",
                name, pod_id
            ),
        }
    }

    fn quote(&self, pod_type: &str) -> String {
        match self {
            PodOperation::SendCommissioningResults { .. } => format!("`{}`", pod_type),
            _ => format!("'{}'", pod_type),
        }
    }
}

/// Reword a single-target failure.
///
/// Known kinds become [`Error::PodProblem`] with an operation specific
/// message; anything else is returned as [`Error::Remote`] unchanged.
pub fn wrap_failure(operation: &PodOperation, pod_type: &str, error: RemoteError) -> Error {
    let prefix = operation.prefix();
    match classify(&error) {
        RemoteErrorKind::UnknownDriverType => {
            let noun = match operation {
                PodOperation::SendCommissioningResults { .. } => "Pod",
                _ => "pod",
            };
            Error::PodProblem(format!(
                "{} {} is an unknown {} type.",
                prefix,
                operation.quote(pod_type),
                noun
            ))
        }
        RemoteErrorKind::NotImplemented => Error::PodProblem(format!(
            "{} {} driver does not implement the '{}' method.",
            prefix,
            operation.quote(pod_type),
            operation.method_name()
        )),
        RemoteErrorKind::ActionFailure => Error::PodProblem(format!("{}: {}", prefix, error)),
        RemoteErrorKind::Other => Error::Remote(error),
    }
}
