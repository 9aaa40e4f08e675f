//! Driver access tokens (magic links).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::{StoreError, TokenError};
use crate::model::DriverId;
use crate::store::TokenStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverAccessToken {
    pub token: String,
    pub driver_id: DriverId,
    pub route_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Informational only; a used token still validates until expiry.
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DriverAccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a valid token grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub driver_id: DriverId,
    pub route_id: Uuid,
}

pub struct TokenService {
    store: Arc<dyn TokenStore>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, config: TokenConfig) -> Self {
        Self { store, config }
    }

    pub fn issue(&self, driver_id: &DriverId, route_id: Uuid) -> Result<DriverAccessToken, StoreError> {
        self.issue_at(driver_id, route_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        driver_id: &DriverId,
        route_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DriverAccessToken, StoreError> {
        let token = DriverAccessToken {
            token: Uuid::new_v4().simple().to_string(),
            driver_id: driver_id.clone(),
            route_id,
            expires_at: now + Duration::hours(self.config.ttl_hours),
            used: false,
            used_at: None,
            created_at: now,
        };
        self.store.insert_token(token.clone())?;
        info!(driver_id = %driver_id, %route_id, expires_at = %token.expires_at, "Issued driver access token");
        Ok(token)
    }

    /// Link the driver opens to claim the route.
    pub fn claim_link(&self, token: &DriverAccessToken) -> String {
        format!("{}?token={}", self.config.claim_base_url, token.token)
    }

    pub fn validate(&self, token: &str) -> Result<TokenGrant, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Expiry is a timestamp comparison only: an expired token fails whether
    /// or not it was ever used.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenGrant, TokenError> {
        let Some(stored) = self.store.token(token) else {
            debug!("Unknown token presented");
            return Err(TokenError::Unknown);
        };

        if stored.is_expired_at(now) {
            debug!(driver_id = %stored.driver_id, "Expired token presented");
            return Err(TokenError::Expired {
                expired_at: stored.expires_at,
            });
        }

        if let Err(err) = self.store.mark_used(token, now) {
            warn!(error = %err, "Failed to mark token used");
        }

        Ok(TokenGrant {
            driver_id: stored.driver_id,
            route_id: stored.route_id,
        })
    }
}
