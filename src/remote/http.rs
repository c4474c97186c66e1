//! HTTP client for the hosted auth (`/auth/v1`) and record (`/rest/v1`) APIs.
//!
//! DESIGN
//! ======
//! Thin wrapper over `reqwest`. Response classification and body parsing are
//! pure functions so they can be tested without a live service. The client
//! keeps the current access/refresh tokens and publishes its own sign-in,
//! sign-out, and refresh as auth changes, the way the hosted SDKs do.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures become [`RemoteError::Request`]; non-2xx statuses go
//! through [`classify_status`]. `get_current_user` treats a missing or
//! rejected session as "no user" rather than an error.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::types::{AuthEvent, Collection, Identity, RecordQuery, RemoteError};
use super::{AuthChannel, AuthSubscription, RemoteService};
use crate::config::RemoteConfig;

const PREFER_REPRESENTATION: &str = "return=representation";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";

// =============================================================================
// TOKENS
// =============================================================================

/// Credentials for one signed-in session. Persisted by the CLI between runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix seconds, when the service reported one.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl SessionTokens {
    /// Whether the access token is past its expiry at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_parts(self, now: i64) -> (SessionTokens, Identity) {
        let expires_at = self.expires_at.or_else(|| self.expires_in.map(|secs| now + secs));
        let tokens =
            SessionTokens { access_token: self.access_token, refresh_token: self.refresh_token, expires_at };
        (tokens, self.user)
    }
}

/// Sign-up answers with a full session when email confirmation is off and
/// with the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(Identity),
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    tokens: RwLock<Option<SessionTokens>>,
    /// Access token handed back by sign-up, keyed by the new user's id. Only
    /// the follow-up profile write for that user may use it.
    sign_up_bearer: RwLock<Option<(String, String)>>,
    changes: AuthChannel,
}

impl HttpRemote {
    /// Build a client for the configured project.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| RemoteError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            tokens: RwLock::new(None),
            sign_up_bearer: RwLock::new(None),
            changes: AuthChannel::new(),
        })
    }

    /// Current session credentials, if signed in.
    #[must_use]
    pub fn tokens(&self) -> Option<SessionTokens> {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Adopt credentials saved by an earlier run. The next
    /// `get_current_user` validates them.
    pub fn restore(&self, tokens: SessionTokens) {
        self.set_tokens(Some(tokens));
    }

    /// Trade the refresh token for a new access token and announce it as
    /// [`AuthEvent::TokenRefreshed`].
    ///
    /// # Errors
    ///
    /// [`RemoteError::Unauthenticated`] when there is nothing to refresh, or
    /// the transport/response error.
    pub async fn refresh_session(&self) -> Result<Identity, RemoteError> {
        let refresh_token = self.tokens().map(|t| t.refresh_token).ok_or(RemoteError::Unauthenticated)?;
        let req = self
            .http
            .post(auth_endpoint(&self.base_url, "token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let body = match send(self.with_api_key(req)).await {
            Ok(body) => body,
            Err(RemoteError::InvalidCredentials | RemoteError::Unauthenticated) => {
                self.set_tokens(None);
                self.changes.emit(AuthEvent::SignedOut, None);
                return Err(RemoteError::Unauthenticated);
            }
            Err(e) => return Err(e),
        };
        let (tokens, identity) = parse_token_response(&body)?.into_parts(unix_now());
        self.set_tokens(Some(tokens));
        self.changes.emit(AuthEvent::TokenRefreshed, Some(identity.clone()));
        Ok(identity)
    }

    fn set_tokens(&self, tokens: Option<SessionTokens>) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    /// Take in a sign-up answer without touching the held session. A
    /// returned session is parked for the new user's profile write.
    fn adopt_sign_up(&self, response: SignUpResponse) -> Identity {
        let (bearer, identity) = match response {
            SignUpResponse::Session(session) => (Some(session.access_token), session.user),
            SignUpResponse::User(identity) => (None, identity),
        };
        *self.sign_up_bearer.write().unwrap_or_else(PoisonError::into_inner) =
            bearer.map(|token| (identity.id.clone(), token));
        identity
    }

    /// One-shot: the parked sign-up bearer, if it belongs to `user_id`.
    fn take_sign_up_bearer(&self, user_id: &str) -> Option<String> {
        let mut parked = self.sign_up_bearer.write().unwrap_or_else(PoisonError::into_inner);
        match parked.take() {
            Some((id, token)) if id == user_id => Some(token),
            other => {
                *parked = other;
                None
            }
        }
    }

    fn with_api_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.anon_key)
    }

    /// Attach the API key and the session bearer, falling back to the anon
    /// key when signed out.
    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self.tokens().map_or_else(|| self.anon_key.clone(), |t| t.access_token);
        self.bearing(req, &bearer)
    }

    fn bearing(&self, req: reqwest::RequestBuilder, bearer: &str) -> reqwest::RequestBuilder {
        let req = self.with_api_key(req);
        match HeaderValue::from_str(&format!("Bearer {bearer}")) {
            Ok(value) => req.header(AUTHORIZATION, value),
            Err(_) => req,
        }
    }

    fn rest(&self, method: reqwest::Method, collection: Collection) -> reqwest::RequestBuilder {
        self.authed(self.http.request(method, rest_endpoint(&self.base_url, collection)))
    }
}

#[async_trait::async_trait]
impl RemoteService for HttpRemote {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, RemoteError> {
        let req = self
            .http
            .post(auth_endpoint(&self.base_url, "token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let body = send(self.with_api_key(req)).await?;
        let (tokens, identity) = parse_token_response(&body)?.into_parts(unix_now());
        self.set_tokens(Some(tokens));
        self.changes.emit(AuthEvent::SignedIn, Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<Identity, RemoteError> {
        let req = self
            .http
            .post(auth_endpoint(&self.base_url, "signup"))
            .json(&serde_json::json!({ "email": email, "password": password, "data": metadata }));
        let body = send(self.with_api_key(req)).await?;
        Ok(self.adopt_sign_up(parse_sign_up_response(&body)?))
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let outcome = if self.tokens().is_some() {
            let req = self.authed(self.http.post(auth_endpoint(&self.base_url, "logout")));
            send(req).await.map(|_| ())
        } else {
            Ok(())
        };
        self.set_tokens(None);
        self.changes.emit(AuthEvent::SignedOut, None);
        outcome
    }

    async fn get_current_user(&self) -> Result<Option<Identity>, RemoteError> {
        if self.tokens().is_none() {
            return Ok(None);
        }
        let req = self.authed(self.http.get(auth_endpoint(&self.base_url, "user")));
        match send(req).await {
            Ok(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| RemoteError::Parse(e.to_string())),
            Err(RemoteError::Unauthenticated) => {
                tracing::info!("stored session rejected by auth service");
                self.set_tokens(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.changes.subscribe()
    }

    async fn upsert_profile_record(
        &self,
        identity: &Identity,
        mut fields: Map<String, Value>,
    ) -> Result<Value, RemoteError> {
        fields.insert("id".to_owned(), Value::String(identity.id.clone()));
        let req = match self.take_sign_up_bearer(&identity.id) {
            Some(bearer) => {
                let url = rest_endpoint(&self.base_url, Collection::Profiles);
                self.bearing(self.http.post(url), &bearer)
            }
            None => self.rest(reqwest::Method::POST, Collection::Profiles),
        };
        let req = req
            .header("Prefer", PREFER_UPSERT)
            .json(&fields);
        let body = send(req).await?;
        first_record(&body)?.ok_or_else(|| RemoteError::Rejected("profile upsert returned no row".into()))
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, RemoteError> {
        let req = self
            .rest(reqwest::Method::PATCH, collection)
            .query(&[("id", eq_filter(id))])
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&fields);
        let body = send(req).await?;
        first_record(&body)?.ok_or_else(|| RemoteError::Rejected(format!("no {collection} record with id {id}")))
    }

    async fn select_records(&self, collection: Collection, query: &RecordQuery) -> Result<Vec<Value>, RemoteError> {
        let req = self
            .rest(reqwest::Method::GET, collection)
            .query(&query_params(query));
        let body = send(req).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))
    }

    async fn get_record(&self, collection: Collection, id: &str) -> Result<Option<Value>, RemoteError> {
        let query = RecordQuery::new().eq("id", id);
        let mut params = query_params(&query);
        params.push(("limit".to_owned(), "1".to_owned()));
        let req = self.rest(reqwest::Method::GET, collection).query(&params);
        let body = send(req).await?;
        first_record(&body)
    }

    async fn insert_record(&self, collection: Collection, fields: Map<String, Value>) -> Result<Value, RemoteError> {
        let req = self
            .rest(reqwest::Method::POST, collection)
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&fields);
        let body = send(req).await?;
        first_record(&body)?.ok_or_else(|| RemoteError::Rejected(format!("{collection} insert returned no row")))
    }

    async fn delete_record(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        let req = self
            .rest(reqwest::Method::DELETE, collection)
            .query(&[("id", eq_filter(id))]);
        send(req).await.map(|_| ())
    }
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn auth_endpoint(base_url: &str, path: &str) -> String {
    format!("{}/auth/v1/{path}", base_url.trim_end_matches('/'))
}

fn rest_endpoint(base_url: &str, collection: Collection) -> String {
    format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), collection.as_str())
}

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

fn query_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_owned(), "*".to_owned())];
    params.extend(
        query
            .filters
            .iter()
            .map(|(column, value)| (column.clone(), eq_filter(value))),
    );
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|(column, ascending)| format!("{column}.{}", if *ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_owned(), order));
    }
    params
}

// =============================================================================
// PARSING
// =============================================================================

async fn send(req: reqwest::RequestBuilder) -> Result<String, RemoteError> {
    let response = req.send().await.map_err(|e| RemoteError::Request(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| RemoteError::Request(e.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(classify_status(status, &text));
    }
    Ok(text)
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn parse_token_response(body: &str) -> Result<TokenResponse, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::Parse(e.to_string()))
}

fn parse_sign_up_response(body: &str) -> Result<SignUpResponse, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::Parse(e.to_string()))
}

/// First row of a representation response. Accepts an array or a single
/// object.
fn first_record(body: &str) -> Result<Option<Value>, RemoteError> {
    let value: Value = serde_json::from_str(body).map_err(|e| RemoteError::Parse(e.to_string()))?;
    Ok(match value {
        Value::Array(rows) => rows.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    })
}

/// Human-readable message from an auth or record API error body.
fn error_message(body: &str) -> String {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_owned();
    };
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map_or_else(|| body.trim().to_owned(), str::to_owned)
}

fn is_credentials_rejection(body: &str) -> bool {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let field = |key: &str| fields.get(key).and_then(Value::as_str);
    field("error") == Some("invalid_grant") || field("error_code") == Some("invalid_credentials")
}

/// Map a non-2xx status and body to the error taxonomy.
fn classify_status(status: u16, body: &str) -> RemoteError {
    match status {
        400 if is_credentials_rejection(body) => RemoteError::InvalidCredentials,
        401 | 403 => RemoteError::Unauthenticated,
        400..=499 if status != 408 && status != 429 => RemoteError::Rejected(error_message(body)),
        _ => RemoteError::Response { status, body: body.to_owned() },
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
