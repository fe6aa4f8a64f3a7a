//! `POST /api/auth/register`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{PipelineResponse, RequestContext};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_body, respond};
use crate::service::handler::TerminalHandler;
use crate::service::middleware::auth::{Claims, JwtAuthenticator};
use crate::service::operation::HandlerError;

/// Lifetime of tokens issued at registration.
pub const TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub fitness_level: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), HandlerError> {
        let email = self.email.trim();
        let well_formed = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !well_formed {
            return Err(HandlerError::BadRequest("a valid email is required".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(HandlerError::BadRequest(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(HandlerError::BadRequest("name is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredUser {
    id: String,
    email: String,
    name: String,
    fitness_level: Option<String>,
    goals: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    message: &'static str,
    user: RegisteredUser,
    token: String,
    expires_in: &'static str,
}

/// Accepts a registration and issues an access token for the new user.
pub struct RegisterHandler {
    jwt: Arc<JwtAuthenticator>,
}

impl RegisterHandler {
    #[must_use]
    pub fn new(jwt: Arc<JwtAuthenticator>) -> Self {
        Self { jwt }
    }
}

#[async_trait]
impl TerminalHandler for RegisterHandler {
    async fn invoke(
        &self,
        _ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        let req: RegisterRequest = parse_body(&body)?;
        req.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut claims = Claims::new(id.clone(), TOKEN_TTL_SECS);
        claims.email = Some(req.email.clone());
        let token = self
            .jwt
            .issue(&claims)
            .map_err(|e| HandlerError::Internal(e.into()))?;

        info!(user_id = %id, "new user registered");
        respond(
            StatusCode::CREATED,
            &RegisterResponse {
                message: "User registered successfully",
                user: RegisteredUser {
                    id,
                    email: req.email,
                    name: req.name,
                    fitness_level: req.fitness_level,
                    goals: req.goals,
                },
                token,
                expires_in: "7d",
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::service::middleware::auth::Authenticator;

    fn ctx() -> RequestContext {
        RequestContext::new(Method::POST, "/api/auth/register", "10.0.0.1")
    }

    #[tokio::test]
    async fn registration_returns_usable_token() {
        let jwt = Arc::new(JwtAuthenticator::new("secret"));
        let handler = RegisterHandler::new(jwt.clone());
        let body = Bytes::from_static(
            br#"{"email":"ana@example.com","password":"hunter22","name":"Ana","goals":["strength"]}"#,
        );

        let resp = handler.invoke(ctx(), body).await.unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);

        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(json["user"]["email"], "ana@example.com");
        assert_eq!(json["user"]["goals"][0], "strength");
        assert!(json["user"].get("password").is_none());

        let principal = jwt.authenticate(json["token"].as_str().unwrap()).unwrap();
        assert_eq!(principal.id, json["user"]["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn invalid_registrations_are_rejected() {
        let handler = RegisterHandler::new(Arc::new(JwtAuthenticator::new("secret")));
        for body in [
            r#"{"email":"nope","password":"hunter22","name":"Ana"}"#,
            r#"{"email":"ana@example.com","password":"short","name":"Ana"}"#,
            r#"{"email":"ana@example.com","password":"hunter22","name":"  "}"#,
        ] {
            let err = handler
                .invoke(ctx(), Bytes::from(body))
                .await
                .unwrap_err();
            assert!(matches!(err, HandlerError::BadRequest(_)), "{body}");
        }
    }
}
