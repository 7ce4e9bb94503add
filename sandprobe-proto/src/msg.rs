use serde::{Deserialize, Serialize};

use crate::SandboxConfig;

/// Status value the execute endpoint reports for a successful run.
pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteReq {
    pub code: String,
    pub config: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResp {
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecuteResp {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}
