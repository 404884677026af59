use serde::{Deserialize, Serialize};

/// A stored policy binding. Interpretation belongs to the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRule {
    pub policy: String,
    pub scope: String,
    pub role: String,
    pub kind: String,
    pub verb: String,
    pub target: Option<String>,
}
