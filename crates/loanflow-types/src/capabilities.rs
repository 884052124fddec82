use serde::{Deserialize, Serialize};

/// What the hosting environment reports about itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentCapabilities {
    pub has_modern_request_api: bool,
    pub has_persistent_storage: bool,
    pub is_embedded_browser_environment: bool,
}

impl Default for EnvironmentCapabilities {
    fn default() -> Self {
        Self {
            has_modern_request_api: true,
            has_persistent_storage: true,
            is_embedded_browser_environment: false,
        }
    }
}

impl EnvironmentCapabilities {
    /// Embedded or legacy network stacks get the resilient request policy.
    pub fn needs_resilient_requests(&self) -> bool {
        self.is_embedded_browser_environment || !self.has_modern_request_api
    }
}
