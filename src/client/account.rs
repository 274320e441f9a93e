//! Account endpoints. All of them go through the same deduplication layer as
//! every other call.

use reqwest::Method;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{Credential, Identity};
use crate::client::SessionClient;
use crate::error::{SessionError, SessionResult};

pub const REGISTER_PATH: &str = "/auth/register";
pub const PASSWORD_RESET_REQUEST_PATH: &str = "/auth/reset-password/request";
pub const PASSWORD_RESET_PATH: &str = "/auth/reset-password";
pub const CHANGE_PASSWORD_PATH: &str = "/auth/account-password/reset";
pub const VERIFY_EMAIL_PATH: &str = "/auth/verify";
pub const SEND_VERIFICATION_PATH: &str = "/auth/verify-email";

impl SessionClient {
    /// Create an account. If the backend signs the new user in (issues a
    /// credential), the session is established as with `login`.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> SessionResult<Arc<Identity>> {
        let mut body = json!({ "email": email, "password": password });
        if let Some(name) = name {
            body["name"] = json!(name);
        }
        let response = self
            .gateway
            .call_public(Method::POST, REGISTER_PATH, Some(body))
            .await?;
        let identity: Identity = response.json()?;

        match Credential::from_cookies(&response.cookies) {
            Ok(credential) => Ok(self.establish(identity, credential)),
            Err(_) => {
                tracing::info!(identity = %identity.id, "Registered without a session");
                Ok(Arc::new(identity))
            }
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> SessionResult<()> {
        self.gateway
            .call_public(
                Method::POST,
                PASSWORD_RESET_REQUEST_PATH,
                Some(json!({ "email": email })),
            )
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> SessionResult<()> {
        self.gateway
            .call_public(
                Method::POST,
                PASSWORD_RESET_PATH,
                Some(json!({ "token": token, "password": password })),
            )
            .await?;
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> SessionResult<()> {
        self.gateway
            .call_public(Method::POST, VERIFY_EMAIL_PATH, Some(json!({ "token": token })))
            .await?;
        Ok(())
    }

    /// Change the password of the logged-in user.
    pub async fn change_password(&self, current: &str, new: &str) -> SessionResult<()> {
        self.authorized(
            Method::POST,
            CHANGE_PASSWORD_PATH,
            Some(json!({ "currentPassword": current, "newPassword": new })),
        )
        .await?;
        Ok(())
    }

    /// Ask the backend to send a new verification email. Needs the CSRF token,
    /// so it fails fast without a credential.
    pub async fn send_verification_email(&self) -> SessionResult<()> {
        if self.coordinator.current().is_none() {
            return Err(SessionError::CsrfMissing);
        }
        self.authorized(Method::POST, SEND_VERIFICATION_PATH, Some(json!({})))
            .await?;
        Ok(())
    }
}
