use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display fields of a member as resolved by the member directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// A member reference that may or may not have been hydrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthorRef {
    Member(MemberProfile),
    Unresolved(Uuid),
}

impl AuthorRef {
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::Member(profile) => profile.id,
            Self::Unresolved(id) => *id,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Member(profile) => profile.username.clone(),
            Self::Unresolved(id) => id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_serializes_as_bare_id() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(AuthorRef::Unresolved(id)).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }

    #[test]
    fn resolved_round_trips_as_object() {
        let profile = MemberProfile {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: None,
            picture: Some("ada.png".into()),
        };
        let json = serde_json::to_string(&AuthorRef::Member(profile.clone())).unwrap();
        let back: AuthorRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AuthorRef::Member(profile));
        assert_eq!(back.display_name(), "ada");
    }
}
