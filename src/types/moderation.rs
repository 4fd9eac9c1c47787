use serde::{Deserialize, Serialize};

/// Text submitted for moderation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModerationRequest {
    pub input: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModerationResult {
    pub flagged: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModerationResponse {
    #[serde(default)]
    pub id: String,
    pub results: Vec<ModerationResult>,
}

impl ModerationResponse {
    /// True if any result was flagged.
    pub fn flagged(&self) -> bool {
        self.results.iter().any(|result| result.flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flagged_if_any_result_is() {
        let json = serde_json::json!({
            "id": "modr-1",
            "results": [{"flagged": false, "categories": {}}, {"flagged": true}]
        });
        let response: ModerationResponse = serde_json::from_value(json).unwrap();
        assert!(response.flagged());
    }
}
