//! Payment hand-off with provider fallback.
//!
//! The coordinator never performs I/O itself. `open`, `settle` and `close`
//! return [`PaymentAction`]s; whoever drives the session runs the requested
//! token exchange and feeds the outcome back through `settle`. A provider whose
//! exchange fails stays disabled for the rest of the page lifetime, and
//! checkout payloads are cached per provider and token.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use playport_core::{lock_or_recover_mutex, write_text_atomic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
/// Enumerates supported `PaymentProvider` values.
pub enum PaymentProvider {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
}

impl PaymentProvider {
    pub const PRIMARY: PaymentProvider = PaymentProvider::A;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            _ => None,
        }
    }

    pub fn alternate(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
/// Enumerates supported `ExchangeError` values.
pub enum ExchangeError {
    #[error("provider rejected token exchange ({} field errors)", field_errors.len())]
    Rejected {
        field_errors: BTreeMap<String, Vec<String>>,
    },
    #[error("token exchange returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("token exchange transport error: {0}")]
    Transport(String),
    #[error("invalid token exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::HttpStatus { .. } => "http_status",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Field-keyed error map for the failure callback; empty when the error
    /// carries no structured detail.
    pub fn to_wire(&self) -> Value {
        let mut fields = Map::new();
        if let Self::Rejected { field_errors } = self {
            for (field, messages) in field_errors {
                fields.insert(
                    field.clone(),
                    Value::Array(messages.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        Value::Object(fields)
    }
}

#[async_trait]
/// Network collaborator that trades a payment token for a checkout payload.
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, provider: PaymentProvider, token: &str)
        -> Result<Value, ExchangeError>;
}

/// Client-side memory of the last provider that produced a checkout.
pub trait PaymentPreferenceStore: Send + Sync {
    fn load(&self) -> Option<PaymentProvider>;
    fn save(&self, provider: PaymentProvider) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    provider: Mutex<Option<PaymentProvider>>,
}

impl MemoryPreferenceStore {
    pub fn with_provider(provider: PaymentProvider) -> Self {
        Self {
            provider: Mutex::new(Some(provider)),
        }
    }
}

impl PaymentPreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Option<PaymentProvider> {
        *lock_or_recover_mutex(&self.provider)
    }

    fn save(&self, provider: PaymentProvider) -> Result<()> {
        *lock_or_recover_mutex(&self.provider) = Some(provider);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPaymentPreference {
    payment_system: PaymentProvider,
}

#[derive(Debug, Clone)]
/// JSON file holding the remembered provider, written atomically.
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PaymentPreferenceStore for FilePreferenceStore {
    fn load(&self) -> Option<PaymentProvider> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredPaymentPreference>(&raw) {
            Ok(stored) => Some(stored.payment_system),
            Err(error) => {
                tracing::debug!(
                    path = %self.path.display(),
                    %error,
                    "ignoring unreadable payment preference"
                );
                None
            }
        }
    }

    fn save(&self, provider: PaymentProvider) -> Result<()> {
        let encoded = serde_json::to_string(&StoredPaymentPreference {
            payment_system: provider,
        })
        .context("failed to encode payment preference")?;
        write_text_atomic(&self.path, &encoded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentAction {
    Exchange {
        provider: PaymentProvider,
        token: String,
    },
    Render {
        provider: PaymentProvider,
        payload: Value,
    },
    Failed {
        errors: Value,
    },
    Close {
        notify: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "provider")]
pub enum PaymentOverlay {
    Closed,
    Pending,
    Rendered(PaymentProvider),
}

pub struct PaymentCoordinator {
    preference: Arc<dyn PaymentPreferenceStore>,
    cache: HashMap<(PaymentProvider, String), Value>,
    disabled: BTreeSet<PaymentProvider>,
    in_flight: Option<(PaymentProvider, String)>,
    overlay: PaymentOverlay,
}

impl PaymentCoordinator {
    pub fn new(preference: Arc<dyn PaymentPreferenceStore>) -> Self {
        Self {
            preference,
            cache: HashMap::new(),
            disabled: BTreeSet::new(),
            in_flight: None,
            overlay: PaymentOverlay::Closed,
        }
    }

    /// Starts a payment attempt for `token`.
    pub fn open(&mut self, token: &str) -> Vec<PaymentAction> {
        if let Some((provider, pending)) = &self.in_flight {
            tracing::debug!(
                provider = provider.as_str(),
                pending_token = pending.as_str(),
                "payment open ignored while an exchange is in flight"
            );
            return Vec::new();
        }
        self.overlay = PaymentOverlay::Pending;
        let preferred = self.preference.load().unwrap_or(PaymentProvider::PRIMARY);
        let provider = if self.disabled.contains(&preferred) {
            preferred.alternate()
        } else {
            preferred
        };
        self.attempt(provider, token, Value::Object(Map::new()))
    }

    /// Applies the outcome of an exchange requested by [`PaymentAction::Exchange`].
    pub fn settle(
        &mut self,
        provider: PaymentProvider,
        token: &str,
        result: Result<Value, ExchangeError>,
    ) -> Vec<PaymentAction> {
        let expected = matches!(
            &self.in_flight,
            Some((pending_provider, pending_token))
                if *pending_provider == provider && pending_token == token
        );
        if !expected {
            tracing::debug!(
                provider = provider.as_str(),
                "discarding exchange result with no matching attempt"
            );
            return Vec::new();
        }
        self.in_flight = None;

        match result {
            Ok(payload) => {
                self.cache
                    .insert((provider, token.to_string()), payload.clone());
                self.succeed(provider, payload)
            }
            Err(error) => {
                tracing::debug!(
                    provider = provider.as_str(),
                    error_kind = error.kind(),
                    %error,
                    "payment provider disabled after failed exchange"
                );
                self.disabled.insert(provider);
                self.attempt(provider.alternate(), token, error.to_wire())
            }
        }
    }

    /// Tears the overlay down. Closing an already closed overlay does nothing.
    pub fn close(&mut self, notify: bool) -> Vec<PaymentAction> {
        if self.overlay == PaymentOverlay::Closed {
            return Vec::new();
        }
        self.overlay = PaymentOverlay::Closed;
        self.in_flight = None;
        vec![PaymentAction::Close { notify }]
    }

    pub fn overlay(&self) -> PaymentOverlay {
        self.overlay
    }

    pub fn is_disabled(&self, provider: PaymentProvider) -> bool {
        self.disabled.contains(&provider)
    }

    pub fn cached_payloads(&self) -> usize {
        self.cache.len()
    }

    pub fn exchange_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    fn attempt(
        &mut self,
        provider: PaymentProvider,
        token: &str,
        last_errors: Value,
    ) -> Vec<PaymentAction> {
        if self.disabled.contains(&provider) {
            return self.exhaust(last_errors);
        }
        if let Some(payload) = self.cache.get(&(provider, token.to_string())).cloned() {
            return self.succeed(provider, payload);
        }
        self.in_flight = Some((provider, token.to_string()));
        vec![PaymentAction::Exchange {
            provider,
            token: token.to_string(),
        }]
    }

    fn succeed(&mut self, provider: PaymentProvider, payload: Value) -> Vec<PaymentAction> {
        if let Err(error) = self.preference.save(provider) {
            tracing::warn!(
                provider = provider.as_str(),
                error = %format!("{error:#}"),
                "failed to remember payment provider"
            );
        }
        self.overlay = PaymentOverlay::Rendered(provider);
        vec![PaymentAction::Render { provider, payload }]
    }

    fn exhaust(&mut self, errors: Value) -> Vec<PaymentAction> {
        tracing::warn!("payment providers exhausted, abandoning attempt");
        let mut actions = vec![PaymentAction::Failed { errors }];
        actions.extend(self.close(true));
        actions
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::json;

    use super::{
        ExchangeError, FilePreferenceStore, MemoryPreferenceStore, PaymentAction,
        PaymentCoordinator, PaymentOverlay, PaymentPreferenceStore, PaymentProvider,
    };

    fn rejected(field: &str, message: &str) -> ExchangeError {
        ExchangeError::Rejected {
            field_errors: BTreeMap::from([(field.to_string(), vec![message.to_string()])]),
        }
    }

    fn exchange(provider: PaymentProvider, token: &str) -> PaymentAction {
        PaymentAction::Exchange {
            provider,
            token: token.to_string(),
        }
    }

    #[test]
    fn unit_provider_wire_names_and_alternates() {
        assert_eq!(PaymentProvider::PRIMARY, PaymentProvider::A);
        assert_eq!(PaymentProvider::A.alternate(), PaymentProvider::B);
        assert_eq!(PaymentProvider::parse(" B "), Some(PaymentProvider::B));
        assert_eq!(PaymentProvider::parse("C"), None);
        assert_eq!(
            serde_json::to_value(PaymentProvider::B).expect("encode"),
            json!("B")
        );
    }

    #[test]
    fn unit_exchange_error_wire_shape_is_field_keyed() {
        assert_eq!(
            rejected("token", "expired").to_wire(),
            json!({"token": ["expired"]})
        );
        assert_eq!(
            ExchangeError::Transport("reset".to_string()).to_wire(),
            json!({})
        );
    }

    #[test]
    fn functional_open_starts_with_primary_and_renders_on_success() {
        let preference = Arc::new(MemoryPreferenceStore::default());
        let mut coordinator = PaymentCoordinator::new(preference.clone());
        assert_eq!(
            coordinator.open("tok"),
            vec![exchange(PaymentProvider::A, "tok")]
        );
        assert_eq!(coordinator.overlay(), PaymentOverlay::Pending);

        let actions = coordinator.settle(PaymentProvider::A, "tok", Ok(json!({"url": "a"})));
        assert_eq!(
            actions,
            vec![PaymentAction::Render {
                provider: PaymentProvider::A,
                payload: json!({"url": "a"})
            }]
        );
        assert_eq!(preference.load(), Some(PaymentProvider::A));
        assert_eq!(
            coordinator.overlay(),
            PaymentOverlay::Rendered(PaymentProvider::A)
        );
    }

    #[test]
    fn functional_failed_provider_falls_back_and_stays_disabled() {
        let preference = Arc::new(MemoryPreferenceStore::default());
        let mut coordinator = PaymentCoordinator::new(preference.clone());
        coordinator.open("tok");
        assert_eq!(
            coordinator.settle(PaymentProvider::A, "tok", Err(rejected("token", "bad"))),
            vec![exchange(PaymentProvider::B, "tok")]
        );
        coordinator.settle(PaymentProvider::B, "tok", Ok(json!({"session": "P"})));
        assert_eq!(preference.load(), Some(PaymentProvider::B));
        assert!(coordinator.is_disabled(PaymentProvider::A));

        coordinator.close(false);
        assert_eq!(
            coordinator.open("tok2"),
            vec![exchange(PaymentProvider::B, "tok2")]
        );
    }

    #[test]
    fn functional_cached_payload_skips_exchange() {
        let mut coordinator = PaymentCoordinator::new(Arc::new(MemoryPreferenceStore::default()));
        coordinator.open("tok");
        coordinator.settle(PaymentProvider::A, "tok", Ok(json!({"session": 1})));
        coordinator.close(true);

        let actions = coordinator.open("tok");
        assert_eq!(
            actions,
            vec![PaymentAction::Render {
                provider: PaymentProvider::A,
                payload: json!({"session": 1})
            }]
        );
        assert_eq!(coordinator.cached_payloads(), 1);
    }

    #[test]
    fn integration_exhaustion_fails_and_closes_exactly_once() {
        let mut coordinator = PaymentCoordinator::new(Arc::new(MemoryPreferenceStore::default()));
        coordinator.open("tok");
        coordinator.settle(
            PaymentProvider::A,
            "tok",
            Err(ExchangeError::Transport("timeout".to_string())),
        );
        let actions =
            coordinator.settle(PaymentProvider::B, "tok", Err(rejected("amount", "too low")));
        assert_eq!(
            actions,
            vec![
                PaymentAction::Failed {
                    errors: json!({"amount": ["too low"]})
                },
                PaymentAction::Close { notify: true }
            ]
        );
        assert!(coordinator.close(true).is_empty());
        assert_eq!(coordinator.overlay(), PaymentOverlay::Closed);

        let again = coordinator.open("tok3");
        assert_eq!(
            again,
            vec![
                PaymentAction::Failed { errors: json!({}) },
                PaymentAction::Close { notify: true }
            ]
        );
    }

    #[test]
    fn integration_file_preference_store_persists_provider() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("payments").join("preference.json");
        let store = FilePreferenceStore::new(&path);
        assert_eq!(store.load(), None);
        store.save(PaymentProvider::B).expect("save preference");
        assert_eq!(FilePreferenceStore::new(&path).load(), Some(PaymentProvider::B));

        std::fs::write(&path, "{not json").expect("corrupt preference");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn regression_open_while_exchange_in_flight_is_ignored() {
        let mut coordinator = PaymentCoordinator::new(Arc::new(MemoryPreferenceStore::default()));
        coordinator.open("tok");
        assert!(coordinator.open("tok").is_empty());
        assert!(coordinator.exchange_in_flight());
        assert!(coordinator
            .settle(PaymentProvider::B, "tok", Ok(json!({})))
            .is_empty());
    }

    #[test]
    fn regression_remembered_preference_picks_initial_provider() {
        let preference = Arc::new(MemoryPreferenceStore::with_provider(PaymentProvider::B));
        let mut coordinator = PaymentCoordinator::new(preference);
        assert_eq!(
            coordinator.open("tok"),
            vec![exchange(PaymentProvider::B, "tok")]
        );
        assert_eq!(
            coordinator.settle(
                PaymentProvider::B,
                "tok",
                Err(ExchangeError::HttpStatus {
                    status: 502,
                    body: "bad gateway".to_string()
                })
            ),
            vec![exchange(PaymentProvider::A, "tok")]
        );
    }
}
