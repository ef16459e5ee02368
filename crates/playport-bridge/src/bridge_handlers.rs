//! Capability handlers: stateless adapters from frame commands to host collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use playport_core::lock_or_recover_mutex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::bridge_command::{BridgeMethod, CapabilityRequest};
use crate::bridge_outbound::OutboundEnvelope;

/// Fixed greeting returned to `sayHello`.
pub const FRAME_GREETING: &str = "hello";

#[derive(Debug, Clone, Error, PartialEq)]
/// Enumerates supported `CapabilityError` values.
pub enum CapabilityError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {reason}")]
    Rejected { reason: String },
}

impl CapabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Host authentication flow. Calls only trigger the flow and return immediately.
pub trait AuthFlow: Send + Sync {
    fn begin_authorization(&self, wait_for_result: bool);
    fn sign_out(&self);
}

#[async_trait]
pub trait UsersDirectory: Send + Sync {
    async fn get_users(&self, query: Value) -> Result<Value, CapabilityError>;
}

#[async_trait]
/// Persistent key-value storage scoped per game.
pub trait SaveDataStore: Send + Sync {
    async fn load(&self, game_id: &str, query: Value) -> Result<Value, CapabilityError>;
    async fn store(&self, game_id: &str, data: Value) -> Result<Value, CapabilityError>;
}

#[derive(Clone)]
pub struct CapabilityHandlers {
    game_id: String,
    auth: Arc<dyn AuthFlow>,
    users: Arc<dyn UsersDirectory>,
    saves: Arc<dyn SaveDataStore>,
}

impl CapabilityHandlers {
    pub fn new(
        game_id: impl Into<String>,
        auth: Arc<dyn AuthFlow>,
        users: Arc<dyn UsersDirectory>,
        saves: Arc<dyn SaveDataStore>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            auth,
            users,
            saves,
        }
    }

    /// Serves one request and returns the reply for the frame, if the method has one.
    pub async fn handle(&self, request: CapabilityRequest) -> Option<OutboundEnvelope> {
        let method = request.method();
        match request {
            CapabilityRequest::Authorize { wait_for_result } => {
                self.auth.begin_authorization(wait_for_result);
                None
            }
            CapabilityRequest::Logout => {
                self.auth.sign_out();
                None
            }
            CapabilityRequest::SayHello => Some(OutboundEnvelope::ack(
                BridgeMethod::SayHello,
                Value::String(FRAME_GREETING.to_string()),
                None,
            )),
            CapabilityRequest::GetUsers(query) => {
                Some(reply(method, self.users.get_users(query).await))
            }
            CapabilityRequest::GetSaveData(query) => {
                Some(reply(method, self.saves.load(&self.game_id, query).await))
            }
            CapabilityRequest::SetSaveData(data) => {
                Some(reply(method, self.saves.store(&self.game_id, data).await))
            }
        }
    }
}

fn reply(method: BridgeMethod, result: Result<Value, CapabilityError>) -> OutboundEnvelope {
    match result {
        Ok(payload) => OutboundEnvelope::ack(method, payload, None),
        Err(error) => {
            tracing::debug!(method = method.as_str(), %error, "capability request failed");
            OutboundEnvelope::ack(method, Value::Null, Some(error.to_wire()))
        }
    }
}

#[derive(Debug, Default)]
/// In-process [`SaveDataStore`]; records live as JSON objects keyed by game id.
pub struct MemorySaveDataStore {
    records: Mutex<HashMap<String, Map<String, Value>>>,
}

impl MemorySaveDataStore {
    fn read_record(&self, game_id: &str) -> Map<String, Value> {
        lock_or_recover_mutex(&self.records)
            .get(game_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SaveDataStore for MemorySaveDataStore {
    async fn load(&self, game_id: &str, query: Value) -> Result<Value, CapabilityError> {
        let key = query
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut record = self.read_record(game_id);
        Ok(match key {
            Some(key) => record.remove(&key).unwrap_or(Value::Null),
            None => Value::Object(record),
        })
    }

    async fn store(&self, game_id: &str, data: Value) -> Result<Value, CapabilityError> {
        let Value::Object(fields) = data else {
            return Err(CapabilityError::Rejected {
                reason: "save data must be a JSON object".to_string(),
            });
        };
        let mut records = lock_or_recover_mutex(&self.records);
        let record = records.entry(game_id.to_string()).or_default();
        record.extend(fields);
        Ok(Value::Object(record.clone()))
    }
}
