use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::session_payment::{ExchangeError, PaymentProvider, TokenExchange};

#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    payment_system: PaymentProvider,
    token: &'a str,
}

#[derive(Clone)]
/// `TokenExchange` backed by the host's checkout endpoint.
pub struct HttpTokenExchange {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTokenExchange {
    pub fn new(endpoint: impl Into<String>, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("playport-host"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create token exchange client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim().to_string(),
        })
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(
        &self,
        provider: PaymentProvider,
        token: &str,
    ) -> Result<Value, ExchangeError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&TokenExchangeRequest {
                payment_system: provider,
                token,
            })
            .send()
            .await
            .map_err(|error| ExchangeError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ExchangeError::Transport(error.to_string()))?;
        tracing::debug!(
            provider = provider.as_str(),
            status = status.as_u16(),
            "token exchange response received"
        );

        if status.is_success() {
            return serde_json::from_str::<Value>(&body)
                .map_err(|error| ExchangeError::InvalidResponse(error.to_string()));
        }
        if status.is_client_error() {
            if let Some(field_errors) = parse_field_errors(&body) {
                return Err(ExchangeError::Rejected { field_errors });
            }
        }
        Err(ExchangeError::HttpStatus {
            status: status.as_u16(),
            body: truncate_for_error(&body, 256),
        })
    }
}

/// Reads `{"errors": {field: message | [messages]}}` from a rejection body.
fn parse_field_errors(body: &str) -> Option<BTreeMap<String, Vec<String>>> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let errors = value.get("errors")?.as_object()?;
    let mut fields = BTreeMap::new();
    for (field, messages) in errors {
        let messages = match messages {
            Value::String(message) => vec![message.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                })
                .collect(),
            other => vec![other.to_string()],
        };
        fields.insert(field.clone(), messages);
    }
    Some(fields)
}

fn truncate_for_error(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let truncated = body.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}
