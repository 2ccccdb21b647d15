//! Submission evaluation notifications.
//!
//! The judging pipeline publishes one JSON message per evaluated submission;
//! the gateway forwards each to the submitting user's live connections.

use serde::{Deserialize, Serialize};

use gatehouse_core::UserId;

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::EvaluationSubscriber;

/// Channel the evaluator publishes on.
pub const EVALUATED_CHANNEL: &str = "evaluated";

/// Message published when a submission finishes evaluation.
///
/// Field names are camelCase on the wire; PascalCase is accepted as well
/// since some publishers serialize struct names verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedSubmission {
    #[serde(default, alias = "Status")]
    pub status: String,
    #[serde(default, alias = "SubmissionId")]
    pub submission_id: String,
    #[serde(default, alias = "ProblemId")]
    pub problem_id: String,
    #[serde(default, alias = "UserId")]
    pub user_id: String,
}

impl EvaluatedSubmission {
    /// Recipient of the notification, if `user_id` is numeric.
    pub fn recipient(&self) -> Option<UserId> {
        self.user_id.parse().ok()
    }
}
