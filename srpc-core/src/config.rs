//! Connection configuration

/// What happens to outgoing calls that are still unanswered when the
/// transport goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbandonPolicy {
    /// Resolve them with `SrpcError::ConnectionClosed`
    #[default]
    Fail,
    /// Never resolve them; the futures stay pending as long as the connection lives
    LeaveUnresolved,
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Name used in log output (usually the charge point identity)
    pub label: String,

    /// Treatment of unanswered outgoing calls on close or disconnect
    pub abandon_policy: AbandonPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            label: "srpc".to_string(),
            abandon_policy: AbandonPolicy::Fail,
        }
    }
}

impl ConnectionConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Set abandon policy
    pub fn with_abandon_policy(mut self, policy: AbandonPolicy) -> Self {
        self.abandon_policy = policy;
        self
    }

    /// Leave unanswered calls pending instead of failing them
    pub fn leave_unresolved(self) -> Self {
        self.with_abandon_policy(AbandonPolicy::LeaveUnresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConnectionConfig::new("CS001");
        assert_eq!(config.label, "CS001");
        assert_eq!(config.abandon_policy, AbandonPolicy::Fail);

        let config = config.leave_unresolved();
        assert_eq!(config.abandon_policy, AbandonPolicy::LeaveUnresolved);
    }
}
