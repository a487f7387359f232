use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{page::MessagePage, thread::Media};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDirectMessageRequest {
    pub recipient: Uuid,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// History response; on failure the page is zeroed and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageResponse {
    #[serde(flatten)]
    pub page: MessagePage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_defaults_optional_fields() {
        let recipient = Uuid::new_v4();
        let request: SendDirectMessageRequest =
            serde_json::from_value(serde_json::json!({ "recipient": recipient })).unwrap();
        assert_eq!(request.recipient, recipient);
        assert!(request.body.is_none());
        assert!(request.media.is_empty());
    }

    #[test]
    fn page_response_flattens_counters() {
        let response = PageResponse {
            page: MessagePage::empty(),
            error: Some("thread not found".into()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["page_available"], 0);
        assert_eq!(json["more_available"], false);
        assert_eq!(json["messages"], serde_json::json!([]));
        assert_eq!(json["error"], "thread not found");
    }
}
