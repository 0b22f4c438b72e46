//! Identity-provider client: password sign-in and admin account management.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;

pub const ERR_AUTH_INVALID: &str = "ERR_AUTH_INVALID";
pub const ERR_AUTH_REJECTED: &str = "ERR_AUTH_REJECTED";
pub const ERR_AUTH_UNAVAILABLE: &str = "ERR_AUTH_UNAVAILABLE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignIn {
    pub user: IdentityUser,
    pub session: SessionTokens,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ERR_AUTH_INVALID,
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: ERR_AUTH_REJECTED,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: ERR_AUTH_UNAVAILABLE,
            message: message.into(),
        }
    }

    /// Bad credentials, as opposed to a provider outage or refusal.
    pub fn is_invalid_credentials(&self) -> bool {
        self.code == ERR_AUTH_INVALID
    }

    /// The provider answered and refused the request, e.g. a taken email.
    pub fn is_rejected(&self) -> bool {
        self.code == ERR_AUTH_REJECTED
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn sign_in_with_password(&self, email: &str, password: &str)
    -> Result<SignIn, AuthError>;

    /// Creates an account with its email already confirmed.
    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<IdentityUser, AuthError>;

    async fn admin_delete_user(&self, user_id: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Clone)]
pub struct HttpIdentityConfig {
    pub base_url: String,
    pub anon_key: String,
    pub service_key: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct HttpIdentityProvider {
    base_url: String,
    anon_key: String,
    service_key: String,
    http: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(config: HttpIdentityConfig) -> Result<Self, AuthError> {
        if config.base_url.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "identity provider url must be non-empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_INTERNAL",
                message: "failed to initialize identity http client".to_string(),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key,
            service_key: config.service_key,
            http,
        })
    }

    fn with_key(request: RequestBuilder, key: &str) -> RequestBuilder {
        request.header("apikey", key).bearer_auth(key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, Value), AuthError> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                AuthError::unavailable("identity provider timed out")
            } else {
                AuthError::unavailable("identity provider unreachable")
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };
        Ok((status, value))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    user: Option<IdentityUser>,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignIn, AuthError> {
        let request = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));

        let (status, body) = self.send(Self::with_key(request, &self.anon_key)).await?;
        match status {
            200..=299 => {}
            400 | 401 | 403 | 422 => {
                return Err(AuthError::invalid(
                    provider_message(&body).unwrap_or_else(|| "invalid credentials".to_string()),
                ));
            }
            _ => {
                return Err(AuthError::unavailable(format!(
                    "identity provider returned {}",
                    status
                )));
            }
        }

        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|_| AuthError::unavailable("identity provider returned malformed session"))?;
        let user = token
            .user
            .ok_or_else(|| AuthError::invalid("identity provider returned no user"))?;

        Ok(SignIn {
            user,
            session: SessionTokens {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_in: token.expires_in,
            },
        })
    }

    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<IdentityUser, AuthError> {
        let request = self
            .http
            .post(format!("{}/auth/v1/admin/users", self.base_url))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "full_name": full_name },
            }));

        let (status, body) = self
            .send(Self::with_key(request, &self.service_key))
            .await?;
        if !(200..=299).contains(&status) {
            return Err(status_error(status, &body));
        }

        serde_json::from_value::<IdentityUser>(body)
            .map_err(|_| AuthError::unavailable("identity provider returned malformed user"))
    }

    async fn admin_delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        let request = self
            .http
            .delete(format!("{}/auth/v1/admin/users/{}", self.base_url, user_id));

        let (status, body) = self
            .send(Self::with_key(request, &self.service_key))
            .await?;
        if (200..=299).contains(&status) {
            Ok(())
        } else {
            Err(AuthError::rejected(provider_message(&body).unwrap_or_else(
                || format!("identity provider returned {}", status),
            )))
        }
    }
}

/// A 4xx means the provider refused the request; anything else is an outage.
fn status_error(status: u16, body: &Value) -> AuthError {
    let message =
        provider_message(body).unwrap_or_else(|| format!("identity provider returned {}", status));
    if (400..=499).contains(&status) {
        AuthError::rejected(message)
    } else {
        AuthError::unavailable(message)
    }
}

/// Error text from the provider's body, whichever field this version uses.
fn provider_message(body: &Value) -> Option<String> {
    if let Some(text) = body.as_str() {
        let text = text.trim();
        return (!text.is_empty()).then(|| text.chars().take(512).collect());
    }

    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_message_checks_known_fields_in_order() {
        assert_eq!(
            provider_message(&serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            }))
            .as_deref(),
            Some("Invalid login credentials")
        );
        assert_eq!(
            provider_message(&serde_json::json!({"code": 422, "msg": "already registered"}))
                .as_deref(),
            Some("already registered")
        );
        assert_eq!(
            provider_message(&Value::String("upstream down".to_string())).as_deref(),
            Some("upstream down")
        );
        assert_eq!(provider_message(&Value::Null), None);
    }

    #[test]
    fn client_errors_are_refusals_and_server_errors_are_outages() {
        let refused = status_error(422, &serde_json::json!({"msg": "already registered"}));
        assert!(refused.is_rejected());
        assert_eq!(refused.message, "already registered");

        let outage = status_error(503, &Value::Null);
        assert!(!outage.is_rejected());
        assert_eq!(outage.code, ERR_AUTH_UNAVAILABLE);
        assert_eq!(outage.message, "identity provider returned 503");
    }

    #[test]
    fn new_rejects_empty_base_url() {
        let err = HttpIdentityProvider::new(HttpIdentityConfig {
            base_url: " ".to_string(),
            anon_key: "a".to_string(),
            service_key: "s".to_string(),
            timeout: Duration::from_secs(1),
        })
        .err()
        .expect("empty url must fail");
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }
}
