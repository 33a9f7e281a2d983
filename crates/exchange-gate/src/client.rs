//! Signed REST client for Gate.io v4 perpetual futures.
//!
//! Requests are rate limited with the governor crate and signed with the
//! HMAC-SHA512 scheme Gate requires: the signature covers method, path,
//! query string, a SHA-512 digest of the body, and the timestamp.
//! API secrets are resolved from environment variables named in the config
//! and are never logged.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use ladder_core::config::{CredentialConfig, ExchangeConfig};
use ladder_core::AccountScope;
use nonzero_ext::nonzero;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::{ExchangeError, Result};
use crate::exchange::FuturesExchange;
use crate::types::{
    ContractSpec, FuturesPosition, MarketOrderRequest, OrderReceipt, TriggerOrder,
    TriggerOrderRequest, TriggerStatus,
};

type HmacSha512 = Hmac<Sha512>;

/// Path prefix Gate includes in the signature.
const API_PREFIX: &str = "/api/v4";

struct ApiCredentials {
    key: String,
    secret: SecretString,
}

pub struct GateFuturesClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
    credentials: HashMap<String, ApiCredentials>,
}

impl GateFuturesClient {
    /// Builds a client from the exchange config, resolving each credential's
    /// key and secret from the environment variables the config names.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Configuration`] if a named environment
    /// variable is missing.
    pub fn from_config(
        exchange: &ExchangeConfig,
        credentials: &HashMap<String, CredentialConfig>,
    ) -> Result<Self> {
        let mut resolved = HashMap::with_capacity(credentials.len());
        for (name, cred) in credentials {
            let key = std::env::var(&cred.api_key_env).map_err(|_| {
                ExchangeError::Configuration(format!(
                    "credential '{name}': env var {} not set",
                    cred.api_key_env
                ))
            })?;
            let secret = std::env::var(&cred.api_secret_env).map_err(|_| {
                ExchangeError::Configuration(format!(
                    "credential '{name}': env var {} not set",
                    cred.api_secret_env
                ))
            })?;
            resolved.insert(
                name.clone(),
                ApiCredentials {
                    key,
                    secret: SecretString::from(secret),
                },
            );
        }

        let quota = Quota::per_second(
            NonZeroU32::new(exchange.rate_limit_per_sec).unwrap_or(nonzero!(1u32)),
        );

        Ok(Self {
            http: Client::new(),
            base_url: exchange.api_url.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            credentials: resolved,
        })
    }

    fn credentials_for(&self, scope: &AccountScope) -> Result<&ApiCredentials> {
        self.credentials.get(&scope.credential_ref).ok_or_else(|| {
            ExchangeError::Configuration(format!(
                "no credential named '{}' in config",
                scope.credential_ref
            ))
        })
    }

    fn sign(
        creds: &ApiCredentials,
        method: &Method,
        path: &str,
        query: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<String> {
        let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
        let payload = format!(
            "{}\n{}{}\n{}\n{}\n{}",
            method.as_str(),
            API_PREFIX,
            path,
            query,
            body_hash,
            timestamp
        );
        let mut mac = HmacSha512::new_from_slice(creds.secret.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::Configuration(format!("invalid API secret: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Performs a signed request and returns the parsed JSON body.
    async fn signed_request(
        &self,
        scope: &AccountScope,
        method: Method,
        path: &str,
        query: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.rate_limiter.until_ready().await;

        let creds = self.credentials_for(scope)?;
        let body_text = match &body {
            Some(value) => value.to_string(),
            None => String::new(),
        };
        let timestamp = Utc::now().timestamp();
        let signature = Self::sign(creds, &method, path, query, &body_text, timestamp)?;

        let mut url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        debug!(method = %method, path, "exchange request");

        let mut request = self
            .http
            .request(method, &url)
            .header("KEY", &creds.key)
            .header("Timestamp", timestamp.to_string())
            .header("SIGN", signature)
            .header("Accept", "application/json");
        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::api(status.as_u16(), text));
        }

        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn parse<T: for<'de> Deserialize<'de>>(
        value: serde_json::Value,
        context: &str,
    ) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| ExchangeError::invalid_response(context, e.to_string()))
    }
}

/// Wire shape of a plain futures order (market entry).
#[derive(Debug, Deserialize)]
struct FuturesOrderWire {
    id: i64,
    contract: String,
    size: i64,
    #[serde(with = "rust_decimal::serde::str")]
    fill_price: Decimal,
}

/// Wire shape of a newly created trigger order.
#[derive(Debug, Deserialize)]
struct TriggerOrderIdWire {
    id: i64,
}

#[async_trait]
impl FuturesExchange for GateFuturesClient {
    async fn list_positions(&self, scope: &AccountScope) -> Result<Vec<FuturesPosition>> {
        let path = format!("/futures/{}/positions", scope.settle);
        let value = self
            .signed_request(scope, Method::GET, &path, "", None)
            .await?;
        Self::parse(value, "position list")
    }

    async fn get_contract_spec(
        &self,
        scope: &AccountScope,
        contract: &str,
    ) -> Result<ContractSpec> {
        let path = format!("/futures/{}/contracts/{}", scope.settle, contract);
        let value = self
            .signed_request(scope, Method::GET, &path, "", None)
            .await?;
        Self::parse(value, &format!("contract spec {contract}"))
    }

    async fn update_leverage(
        &self,
        scope: &AccountScope,
        contract: &str,
        leverage: u32,
    ) -> Result<()> {
        let path = format!("/futures/{}/positions/{}/leverage", scope.settle, contract);
        let query = format!("leverage={leverage}");
        self.signed_request(scope, Method::POST, &path, &query, None)
            .await?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        scope: &AccountScope,
        req: &MarketOrderRequest,
    ) -> Result<OrderReceipt> {
        let path = format!("/futures/{}/orders", scope.settle);
        let body = json!({
            "contract": req.contract,
            "size": req.size,
            "price": "0",
            "tif": "ioc",
            "reduce_only": req.reduce_only,
        });
        let value = self
            .signed_request(scope, Method::POST, &path, "", Some(body))
            .await
            .map_err(|e| match e {
                ExchangeError::Api { status_code, message } if status_code < 500 => {
                    ExchangeError::order_rejected(req.contract.clone(), message)
                }
                other => other,
            })?;
        let wire: FuturesOrderWire =
            Self::parse(value, &format!("market order on {}", req.contract))?;
        Ok(OrderReceipt {
            order_id: wire.id.to_string(),
            contract: wire.contract,
            size: wire.size,
            fill_price: wire.fill_price,
        })
    }

    async fn place_trigger_order(
        &self,
        scope: &AccountScope,
        req: &TriggerOrderRequest,
    ) -> Result<String> {
        let path = format!("/futures/{}/price_orders", scope.settle);
        let body = json!({
            "initial": {
                "contract": req.contract,
                "size": req.size,
                "price": "0",
                "tif": "ioc",
                "reduce_only": req.reduce_only,
            },
            "trigger": {
                "strategy_type": 0,
                "price_type": 0,
                "price": req.trigger_price.to_string(),
                "rule": req.rule.wire_code(),
            },
        });
        let value = self
            .signed_request(scope, Method::POST, &path, "", Some(body))
            .await
            .map_err(|e| match e {
                ExchangeError::Api { status_code, message } if status_code < 500 => {
                    ExchangeError::order_rejected(req.contract.clone(), message)
                }
                other => other,
            })?;
        let wire: TriggerOrderIdWire =
            Self::parse(value, &format!("trigger order on {}", req.contract))?;
        Ok(wire.id.to_string())
    }

    async fn cancel_trigger_order(&self, scope: &AccountScope, order_id: &str) -> Result<()> {
        let path = format!("/futures/{}/price_orders/{}", scope.settle, order_id);
        self.signed_request(scope, Method::DELETE, &path, "", None)
            .await
            .map_err(|e| match e {
                ExchangeError::Api { status_code: 404, .. } => {
                    ExchangeError::order_not_found(order_id)
                }
                other => other,
            })?;
        Ok(())
    }

    async fn list_trigger_orders(
        &self,
        scope: &AccountScope,
        status: TriggerStatus,
    ) -> Result<Vec<TriggerOrder>> {
        let path = format!("/futures/{}/price_orders", scope.settle);
        let query = format!("status={status}");
        let value = self
            .signed_request(scope, Method::GET, &path, &query, None)
            .await?;
        Self::parse(value, &format!("{status} trigger orders"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials {
            key: "test-key".to_string(),
            secret: SecretString::from("test-secret".to_string()),
        }
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let c = creds();
        let a =
            GateFuturesClient::sign(&c, &Method::GET, "/futures/usdt/positions", "", "", 1_700_000)
                .unwrap();
        let b =
            GateFuturesClient::sign(&c, &Method::GET, "/futures/usdt/positions", "", "", 1_700_000)
                .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128); // HMAC-SHA512 hex
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_covers_every_component() {
        let c = creds();
        let base =
            GateFuturesClient::sign(&c, &Method::GET, "/futures/usdt/positions", "", "", 1_700_000)
                .unwrap();
        let other_path =
            GateFuturesClient::sign(&c, &Method::GET, "/futures/btc/positions", "", "", 1_700_000)
                .unwrap();
        let other_query = GateFuturesClient::sign(
            &c,
            &Method::GET,
            "/futures/usdt/positions",
            "status=open",
            "",
            1_700_000,
        )
        .unwrap();
        let other_time =
            GateFuturesClient::sign(&c, &Method::GET, "/futures/usdt/positions", "", "", 1_700_001)
                .unwrap();
        assert_ne!(base, other_path);
        assert_ne!(base, other_query);
        assert_ne!(base, other_time);
    }
}
