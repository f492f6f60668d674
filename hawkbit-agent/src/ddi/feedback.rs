//! DDI feedback and configData payloads.
//!
//! All status the agent reports back to hawkBit flows through [`Feedback`]:
//! deployment progress, terminal results, cancel acknowledgements and the
//! device attribute upload.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result state reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Finished {
    None,
    Success,
    Failure,
}

/// Execution state reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Proceeding,
    Closed,
    Rejected,
    Downloaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResult {
    pub finished: Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStatus {
    pub result: FeedbackResult,
    pub execution: Execution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// A DDI status payload.
///
/// Serialized shape:
/// `{ "id"?, "time", "status": { "result": { "finished" }, "execution",
/// "details"? }, "data"? }`
#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub time: String,
    pub status: FeedbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
}

impl Feedback {
    fn new(
        id: Option<String>,
        finished: Finished,
        execution: Execution,
        detail: Option<String>,
    ) -> Self {
        Self {
            id,
            time: timestamp(),
            status: FeedbackStatus {
                result: FeedbackResult { finished },
                execution,
                details: detail.map(|d| vec![d]),
            },
            data: None,
        }
    }

    /// Progress feedback for a running action (`none`/`proceeding`).
    pub fn progress(id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            Finished::None,
            Execution::Proceeding,
            Some(detail.into()),
        )
    }

    /// Terminal feedback closing an action.
    pub fn terminal(id: &str, finished: Finished, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            finished,
            Execution::Closed,
            Some(detail.into()),
        )
    }

    /// Feedback for a completed download-only action (`success`/`downloaded`).
    pub fn downloaded(id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            Finished::Success,
            Execution::Downloaded,
            Some(detail.into()),
        )
    }

    /// Acknowledgement of a cancel action (`success`/`closed`).
    pub fn cancel_ack(id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            Finished::Success,
            Execution::Closed,
            Some(detail.into()),
        )
    }

    /// Rejection of a cancel action (`success`/`rejected`).
    pub fn cancel_rejected(id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            Finished::Success,
            Execution::Rejected,
            Some(detail.into()),
        )
    }

    /// Device identification payload for the configData endpoint.
    pub fn identify(attributes: &BTreeMap<String, String>) -> Self {
        let mut feedback = Self::new(None, Finished::Success, Execution::Closed, None);
        feedback.data = Some(attributes.clone());
        feedback
    }
}

/// Current UTC time in the compact DDI format, e.g. "20260802T143005".
fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn to_value(feedback: &Feedback) -> Value {
        serde_json::to_value(feedback).unwrap()
    }

    #[test]
    fn test_progress_shape() {
        let value = to_value(&Feedback::progress("42", "Download complete. 1.00 MB/s"));
        assert_eq!(value["id"], "42");
        assert_eq!(value["status"]["result"]["finished"], "none");
        assert_eq!(value["status"]["execution"], "proceeding");
        assert_eq!(
            value["status"]["details"],
            json!(["Download complete. 1.00 MB/s"])
        );
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_terminal_success_shape() {
        let value = to_value(&Feedback::terminal(
            "42",
            Finished::Success,
            "Software bundle installed successfully.",
        ));
        assert_eq!(value["status"]["result"]["finished"], "success");
        assert_eq!(value["status"]["execution"], "closed");
    }

    #[test]
    fn test_terminal_failure_shape() {
        let value = to_value(&Feedback::terminal("42", Finished::Failure, "boom"));
        assert_eq!(value["status"]["result"]["finished"], "failure");
        assert_eq!(value["status"]["execution"], "closed");
    }

    #[test]
    fn test_downloaded_shape() {
        let value = to_value(&Feedback::downloaded("42", "done"));
        assert_eq!(value["status"]["result"]["finished"], "success");
        assert_eq!(value["status"]["execution"], "downloaded");
    }

    #[test]
    fn test_cancel_rejected_shape() {
        let value = to_value(&Feedback::cancel_rejected(
            "43",
            "Cancelation impossible, installation started already.",
        ));
        assert_eq!(value["id"], "43");
        assert_eq!(value["status"]["result"]["finished"], "success");
        assert_eq!(value["status"]["execution"], "rejected");
    }

    #[test]
    fn test_identify_carries_attributes_without_id() {
        let mut attributes = BTreeMap::new();
        attributes.insert("model".to_string(), "gateway".to_string());
        attributes.insert("hw_revision".to_string(), "2".to_string());

        let value = to_value(&Feedback::identify(&attributes));
        assert!(value.get("id").is_none());
        assert_eq!(value["status"]["result"]["finished"], "success");
        assert_eq!(value["status"]["execution"], "closed");
        assert!(value["status"].get("details").is_none());
        assert_eq!(value["data"]["model"], "gateway");
        assert_eq!(value["data"]["hw_revision"], "2");
    }

    #[test]
    fn test_timestamp_format() {
        let time = timestamp();
        // YYYYMMDDTHHMMSS
        assert_eq!(time.len(), 15);
        assert_eq!(&time[8..9], "T");
        assert!(time[..8].chars().all(|c| c.is_ascii_digit()));
        assert!(time[9..].chars().all(|c| c.is_ascii_digit()));
    }
}
