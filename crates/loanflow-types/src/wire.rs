//! Request and response bodies exchanged with the application service.
//!
//! Identifiers are accepted as JSON strings or numbers and always surface as
//! `String` on the client side.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Deserializer, Serialize};

use crate::record::{FieldMap, StepNumber};

pub const SESSION_HEADER: &str = "X-Session-Id";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub const GUEST_APPLICATION_PATH: &str = "/applications/guest";
pub const VERIFY_PATH: &str = "/auth/verify";

// Escaped when an id is placed into a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub fn application_path(application_id: &str) -> String {
    format!("/applications/{}", utf8_percent_encode(application_id, SEGMENT))
}

pub fn step_path(application_id: &str) -> String {
    format!(
        "/applications/{}/step",
        utf8_percent_encode(application_id, SEGMENT)
    )
}

/// `POST /applications/guest` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestApplicationCreated {
    #[serde(deserialize_with = "deserialize_id")]
    pub application_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub session_id: String,
}

/// `PUT /applications/{id}/step` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub step: StepNumber,
    pub data: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// `PUT /applications/{id}/step` response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpdateAck {
    pub ok: bool,
}

/// `POST /auth/verify` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub phone: String,
    pub code: String,
    pub application_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedUser {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

/// `POST /auth/verify` response. `application_id` may differ from the one sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<VerifiedUser>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub application_id: Option<String>,
}

/// `GET /applications/{id}` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    #[serde(deserialize_with = "deserialize_id")]
    pub application_id: String,
    pub current_step: StepNumber,
    pub max_step_reached: StepNumber,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub data: FieldMap,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Uint(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
            RawId::Uint(n) => n.to_string(),
        }
    }
}

// Dot segments survive percent-encoding as path navigation, so refuse them.
fn checked_id<E: serde::de::Error>(raw: RawId) -> Result<String, E> {
    let id = String::from(raw);
    match id.as_str() {
        "" | "." | ".." => Err(E::custom(format!("unusable identifier '{id}'"))),
        _ => Ok(id),
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    checked_id(RawId::deserialize(deserializer)?)
}

fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer)?
        .map(checked_id)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_response_accepts_numeric_ids() {
        let parsed: VerifyResponse = serde_json::from_value(json!({
            "success": true,
            "user": { "id": 42 },
            "applicationId": 1007
        }))
        .unwrap();
        assert_eq!(parsed.user.unwrap().id, "42");
        assert_eq!(parsed.application_id.as_deref(), Some("1007"));
    }

    #[test]
    fn verify_response_tolerates_missing_optional_fields() {
        let parsed: VerifyResponse = serde_json::from_value(json!({ "success": false })).unwrap();
        assert!(!parsed.success);
        assert!(parsed.user.is_none());
        assert!(parsed.application_id.is_none());
    }

    #[test]
    fn step_update_omits_absent_phone() {
        let mut data = FieldMap::new();
        data.insert("amount".into(), json!(5000));
        let body = serde_json::to_value(StepUpdate {
            step: 3,
            data,
            phone: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "step": 3, "data": { "amount": 5000 } }));
    }

    #[test]
    fn paths_embed_application_id() {
        assert_eq!(step_path("a1"), "/applications/a1/step");
        assert_eq!(application_path("a1"), "/applications/a1");
    }

    #[test]
    fn paths_escape_reserved_characters_in_ids() {
        assert_eq!(step_path("a/b?c"), "/applications/a%2Fb%3Fc/step");
        assert_eq!(application_path("50%#x"), "/applications/50%25%23x");
        assert_eq!(step_path("app 1"), "/applications/app%201/step");
    }

    #[test]
    fn dot_segment_ids_are_refused() {
        for id in ["", ".", ".."] {
            let parsed = serde_json::from_value::<GuestApplicationCreated>(json!({
                "applicationId": id,
                "sessionId": "s1"
            }));
            assert!(parsed.is_err(), "{id:?} should be refused");
        }
        let parsed = serde_json::from_value::<VerifyResponse>(json!({
            "success": true,
            "applicationId": ".."
        }));
        assert!(parsed.is_err());
    }
}
