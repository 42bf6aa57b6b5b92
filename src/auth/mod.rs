pub mod callback;

use std::{collections::BTreeSet, io};

use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    reqwest::async_http_client,
    url::{self, Url},
    AccessToken, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RefreshToken, Scope, TokenResponse, TokenUrl,
};
use thiserror::Error;
use tracing::{debug, info};

pub use callback::AuthorizationResponse;

use crate::config::GoogleConfig;

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Google OAuth client credentials are not configured (set google.client_id and google.client_secret)")]
    MissingCredentials,
    #[error("invalid OAuth URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no authorization is pending, run login again")]
    NoPendingAuthorization,
    #[error("authorization state did not match the pending login, run login again")]
    StateMismatch,
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("redirect did not contain an authorization code")]
    MissingCode,
    #[error("token request failed: {0}")]
    TokenRequest(String),
    #[error("no refresh token available, log in again")]
    NoRefreshToken,
    #[error("callback listener failed: {0}")]
    Callback(#[from] io::Error),
    #[error("timed out waiting for the authorization redirect")]
    CallbackTimeout,
}

/// The token set of a logged-in session.
#[derive(Clone, Debug)]
pub struct CredentialSet {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub token_endpoint: String,
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub scopes: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// Whether the access token should be refreshed before use at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at,
            None => false,
        }
    }
}

/// A login that has been started but not completed.
///
/// Completing it consumes it, so a redirect can only be exchanged once.
#[derive(Debug)]
pub struct PendingAuthorization {
    csrf_token: CsrfToken,
}

impl PendingAuthorization {
    pub fn state(&self) -> &str {
        self.csrf_token.secret()
    }
}

/// Drives the OAuth2 authorization-code flow against Google.
#[derive(Debug)]
pub struct Authenticator {
    client: BasicClient,
    client_id: ClientId,
    client_secret: ClientSecret,
    token_endpoint: String,
    scopes: Vec<String>,
    redirect_uri: String,
}

impl Authenticator {
    pub fn new(cfg: &GoogleConfig) -> Result<Authenticator, AuthError> {
        if !cfg.has_credentials() {
            return Err(AuthError::MissingCredentials);
        }

        let client_id = ClientId::new(cfg.client_id.trim().to_owned());
        let client_secret = ClientSecret::new(cfg.client_secret.trim().to_owned());
        let auth_url = AuthUrl::new(cfg.auth_url.clone())?;
        let token_url = TokenUrl::new(cfg.token_url.clone())?;
        let redirect_url = RedirectUrl::new(cfg.redirect_uri.clone())?;

        let client = BasicClient::new(
            client_id.clone(),
            Some(client_secret.clone()),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url);

        Ok(Authenticator {
            client,
            client_id,
            client_secret,
            token_endpoint: cfg.token_url.clone(),
            scopes: cfg.scopes.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Build the consent URL the user should open, along with the pending
    /// state needed to complete the login.
    pub fn authorize_url(&self) -> (Url, PendingAuthorization) {
        let (url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("include_granted_scopes", "true")
            .add_extra_param("prompt", "consent")
            .url();

        (url, PendingAuthorization { csrf_token })
    }

    /// Exchange the code carried by `response` for a token set.
    pub async fn exchange_code(
        &self,
        pending: PendingAuthorization,
        response: AuthorizationResponse,
    ) -> Result<CredentialSet, AuthError> {
        let code = response.into_code(pending.state())?;

        info!("exchanging authorization code for tokens");
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        Ok(self.credentials_from_token(&token, None))
    }

    /// Replace the access token in `creds` using its refresh token.
    pub async fn refresh(&self, creds: &mut CredentialSet) -> Result<(), AuthError> {
        let refresh_token = creds.refresh_token.clone().ok_or(AuthError::NoRefreshToken)?;

        debug!("refreshing access token");
        let token = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        *creds = self.credentials_from_token(&token, Some(refresh_token));
        Ok(())
    }

    /// Google usually omits the refresh token from refresh responses, so the
    /// previous one is carried over when that happens.
    fn credentials_from_token(
        &self,
        token: &BasicTokenResponse,
        previous_refresh_token: Option<RefreshToken>,
    ) -> CredentialSet {
        let scopes = match token.scopes() {
            Some(scopes) => scopes.iter().map(|s| s.to_string()).collect(),
            None => self.scopes.iter().cloned().collect(),
        };
        let expires_at = token
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        CredentialSet {
            access_token: token.access_token().clone(),
            refresh_token: token.refresh_token().cloned().or(previous_refresh_token),
            token_endpoint: self.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes,
            expires_at,
        }
    }
}
