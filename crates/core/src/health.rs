//! Gateway liveness.

use serde::{Deserialize, Serialize};

/// Liveness report returned by `GET /health`.
///
/// Has no identity: each poll replaces the previous value entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl HealthStatus {
    pub const HEALTHY: &'static str = "healthy";

    pub fn healthy() -> Self {
        Self {
            status: Self::HEALTHY.to_string(),
            service: None,
        }
    }

    /// Anything other than exactly `healthy` counts as unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.status == Self::HEALTHY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_healthy_is_healthy() {
        assert!(HealthStatus::healthy().is_healthy());

        let degraded: HealthStatus = serde_json::from_str(r#"{"status":"degraded"}"#).unwrap();
        assert!(!degraded.is_healthy());

        let shouting: HealthStatus = serde_json::from_str(r#"{"status":"HEALTHY"}"#).unwrap();
        assert!(!shouting.is_healthy());
    }

    #[test]
    fn keeps_reported_service_name() {
        let h: HealthStatus =
            serde_json::from_str(r#"{"status":"healthy","service":"api"}"#).unwrap();
        assert_eq!(h.service.as_deref(), Some("api"));
    }
}
