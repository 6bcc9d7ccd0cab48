use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Pull-request lifecycle status tracked by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
}

impl Status {
    /// The lowercase name used in API queries, template file names, and
    /// configuration keys
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request as returned by the remote API.
///
/// Only `number` is interpreted by the bot. Every other field is carried
/// through untouched so templates can reference whatever the API returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PullRequest {
    /// Payload for an individual notification: the raw field map plus
    /// `number` and the injected `repository_name`.
    pub fn payload(&self, repository: &str) -> Value {
        let mut map = self.fields.clone();
        map.insert("number".to_string(), json!(self.number));
        map.insert("repository_name".to_string(), json!(repository));
        Value::Object(map)
    }
}

/// Payload for a grouped notification covering several pull requests at once.
pub fn grouped_payload(repository: &str, pulls: &[&PullRequest]) -> Value {
    let items: Vec<Value> = pulls.iter().map(|p| p.payload(repository)).collect();
    json!({
        "repository_name": repository,
        "pulls": items,
    })
}
