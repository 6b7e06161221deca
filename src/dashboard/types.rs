//! Response shapes of the dashboard API.
//!
//! Only the fields the client relies on are typed; anything else the
//! dashboard sends is kept in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    #[serde(default)]
    pub iteration_count: Option<u64>,
    #[serde(default)]
    pub tasks_done: Option<u64>,
    #[serde(default)]
    pub tasks_total: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
