//! Host collaborators used by `replay`. Every call is recorded as a JSON line
//! stamped with the virtual clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use playport_bridge::{
    AuthFlow, CapabilityError, FramePort, FramePortError, OutboundEnvelope, SenderRef,
    UsersDirectory,
};
use playport_core::{lock_or_recover_mutex, ManualClock};
use playport_session::{CampaignOverlay, ExchangeError, PaymentProvider, TokenExchange};
use serde_json::{json, Value};

#[derive(Clone)]
pub(crate) struct ReplayLog {
    clock: ManualClock,
    lines: Arc<Mutex<Vec<Value>>>,
}

impl ReplayLog {
    pub(crate) fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn record(&self, kind: &str, body: Value) {
        let line = json!({
            "at_ms": self.clock.now_ms(),
            "kind": kind,
            "body": body,
        });
        lock_or_recover_mutex(&self.lines).push(line);
    }

    pub(crate) fn take_lines(&self) -> Vec<Value> {
        std::mem::take(&mut *lock_or_recover_mutex(&self.lines))
    }
}

pub(crate) struct ReplayFramePort {
    pub(crate) log: ReplayLog,
}

impl FramePort for ReplayFramePort {
    fn post(&self, target: &SenderRef, envelope: &OutboundEnvelope) -> Result<(), FramePortError> {
        let envelope = serde_json::to_value(envelope)
            .map_err(|error| FramePortError::Failed(error.to_string()))?;
        self.log.record(
            "outbound",
            json!({"target": target.as_str(), "envelope": envelope}),
        );
        Ok(())
    }
}

pub(crate) struct ReplayAuthFlow {
    pub(crate) log: ReplayLog,
}

impl AuthFlow for ReplayAuthFlow {
    fn begin_authorization(&self, wait_for_result: bool) {
        self.log.record(
            "host",
            json!({"call": "begin_authorization", "wait_for_result": wait_for_result}),
        );
    }

    fn sign_out(&self) {
        self.log.record("host", json!({"call": "sign_out"}));
    }
}

/// Users directory with a fixed roster; `{ids: [...]}` filters it.
pub(crate) struct StaticUsersDirectory {
    pub(crate) users: Vec<Value>,
}

#[async_trait]
impl UsersDirectory for StaticUsersDirectory {
    async fn get_users(&self, query: Value) -> Result<Value, CapabilityError> {
        let Some(ids) = query.get("ids") else {
            return Ok(Value::Array(self.users.clone()));
        };
        let Some(ids) = ids.as_array() else {
            return Err(CapabilityError::Rejected {
                reason: "ids must be a list".to_string(),
            });
        };
        let selected = self
            .users
            .iter()
            .filter(|user| user.get("id").is_some_and(|id| ids.contains(id)))
            .cloned()
            .collect();
        Ok(Value::Array(selected))
    }
}

pub(crate) struct ReplayCampaigns {
    pub(crate) log: ReplayLog,
}

impl CampaignOverlay for ReplayCampaigns {
    fn show_campaign(&self, data: Value) {
        self.log.record("host", json!({"call": "show_campaign", "data": data}));
    }
}

/// Exchange used when no `payment.exchange_url` is configured: providers
/// listed in `failing` reject, the rest answer with a synthetic checkout.
pub(crate) struct LoopbackTokenExchange {
    pub(crate) failing: Vec<PaymentProvider>,
}

#[async_trait]
impl TokenExchange for LoopbackTokenExchange {
    async fn exchange(
        &self,
        provider: PaymentProvider,
        token: &str,
    ) -> Result<Value, ExchangeError> {
        if self.failing.contains(&provider) {
            return Err(ExchangeError::Transport(format!(
                "loopback provider {} is configured to fail",
                provider.as_str()
            )));
        }
        Ok(json!({
            "payment_system": provider.as_str(),
            "checkout_id": format!("loopback-{}-{token}", provider.as_str().to_lowercase()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use playport_bridge::UsersDirectory;
    use playport_core::ManualClock;
    use playport_session::{PaymentProvider, TokenExchange};
    use serde_json::json;

    use super::{LoopbackTokenExchange, ReplayLog, StaticUsersDirectory};

    #[test]
    fn unit_replay_log_stamps_virtual_time() {
        let clock = ManualClock::new(0);
        let log = ReplayLog::new(clock.clone());
        clock.set(1_500);
        log.record("host", json!({"call": "sign_out"}));
        let lines = log.take_lines();
        assert_eq!(lines[0]["at_ms"], 1_500);
        assert_eq!(lines[0]["kind"], "host");
        assert!(log.take_lines().is_empty());
    }

    #[tokio::test]
    async fn functional_static_users_filter_by_ids() {
        let users = StaticUsersDirectory {
            users: vec![json!({"id": "u1"}), json!({"id": "u2"})],
        };
        assert_eq!(
            users.get_users(json!({"ids": ["u2"]})).await.expect("users"),
            json!([{"id": "u2"}])
        );
        assert_eq!(users.get_users(json!({})).await.expect("users").as_array().map(Vec::len), Some(2));
        assert!(users.get_users(json!({"ids": "u1"})).await.is_err());
    }

    #[tokio::test]
    async fn regression_loopback_exchange_fails_only_listed_providers() {
        let exchange = LoopbackTokenExchange {
            failing: vec![PaymentProvider::A],
        };
        assert!(exchange.exchange(PaymentProvider::A, "tok").await.is_err());
        let payload = exchange
            .exchange(PaymentProvider::B, "tok")
            .await
            .expect("provider B succeeds");
        assert_eq!(payload["checkout_id"], "loopback-b-tok");
    }
}
