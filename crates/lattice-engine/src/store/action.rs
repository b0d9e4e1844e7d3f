use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state transition request: a namespaced type plus an arbitrary payload.
///
/// Types are `"<domain>/<verb>"` by convention (`"game/updateScore"`), which is
/// what the critical-action set and the built-in reducers match on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// An action with a `null` payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The domain prefix of the type, if namespaced.
    pub fn domain(&self) -> Option<&str> {
        self.kind.split_once('/').map(|(domain, _)| domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn domain_prefix() {
        assert_eq!(Action::bare("game/reset").domain(), Some("game"));
        assert_eq!(Action::bare("reset").domain(), None);
    }

    #[test]
    fn serializes_kind_as_type() {
        let a = Action::new("game/updateScore", 15);
        assert_eq!(serde_json::to_value(&a).unwrap(), json!({ "type": "game/updateScore", "payload": 15 }));
    }
}
