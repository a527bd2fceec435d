use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A target identity the user has already confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRecord {
    pub identity: String,
    pub confirmed_at: DateTime<Utc>,
}
