use serde::Serialize;
use serde_json::Value;

/// JSON pointers where a successful `CreateTweet` reports the new id, tried in order.
pub const CREATED_ID_PATHS: &[&str] = &[
    "/data/create_tweet/tweet_results/result/rest_id",
    "/data/create/result/rest_id",
];

/// Why a call did not produce a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// 200 with an `errors` array.
    SoftError { messages: Vec<String> },
    /// 200 without an id or errors.
    AmbiguousSuccess,
    /// 403: the anti-bot layer rejected the request.
    AntiBotDetection,
    /// Any other non-200 status.
    Http,
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostResult {
    pub success: bool,
    pub id: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub raw: Value,
}

impl PostResult {
    /// The call was rejected in a way fresh CSRF/bearer tokens may fix.
    pub fn requires_credential_refresh(&self) -> bool {
        matches!(self.failure, Some(FailureKind::AntiBotDetection))
    }

    fn failed(status: u16, failure: FailureKind, raw: Value) -> Self {
        Self {
            success: false,
            id: None,
            status,
            failure: Some(failure),
            raw,
        }
    }
}

/// Parse a response body, keeping non-JSON text as a JSON string.
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Created id at the first matching path. Numeric ids are accepted and stringified.
pub fn created_id(body: &Value) -> Option<String> {
    CREATED_ID_PATHS.iter().find_map(|path| match body.pointer(path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Messages of a present `errors` array, which may be empty.
fn error_messages(body: &Value) -> Option<Vec<String>> {
    let errors = body.get("errors")?.as_array()?;
    Some(
        errors
            .iter()
            .map(|e| match e.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => e.to_string(),
            })
            .collect(),
    )
}

pub fn interpret(status: u16, body: Value) -> PostResult {
    match status {
        200 => {
            if let Some(id) = created_id(&body) {
                return PostResult {
                    success: true,
                    id: Some(id),
                    status,
                    failure: None,
                    raw: body,
                };
            }
            match error_messages(&body) {
                Some(messages) => PostResult::failed(status, FailureKind::SoftError { messages }, body),
                None => PostResult::failed(status, FailureKind::AmbiguousSuccess, body),
            }
        }
        403 => PostResult::failed(status, FailureKind::AntiBotDetection, body),
        _ => PostResult::failed(status, FailureKind::Http, body),
    }
}
