use std::sync::Arc;

use oauth2::url::Url;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    auth::{AuthError, Authenticator, AuthorizationResponse, CredentialSet, PendingAuthorization},
    search::SearchResult,
};

/// Credentials shared between the session and the Drive client, so a token
/// refreshed by the client is what the session holds afterwards.
pub type SharedCredentials = Arc<Mutex<CredentialSet>>;

/// The results of the most recent search, kept for the "previous results" view.
#[derive(Debug, Clone)]
pub struct LastSearch {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// All state belonging to one user session.
///
/// Nothing here outlives the process.
#[derive(Debug, Default)]
pub struct Session {
    credentials: Option<SharedCredentials>,
    pending: Option<PendingAuthorization>,
    last_search: Option<LastSearch>,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn credentials(&self) -> Option<SharedCredentials> {
        self.credentials.clone()
    }

    #[cfg(test)]
    pub fn has_pending_login(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a login. Any earlier pending login is abandoned.
    pub fn begin_login(&mut self, authenticator: &Authenticator) -> Url {
        let (url, pending) = authenticator.authorize_url();
        self.pending = Some(pending);
        url
    }

    /// Finish the pending login with the redirect the browser received.
    ///
    /// The pending login is consumed whether or not the exchange succeeds.
    pub async fn complete_login(
        &mut self,
        authenticator: &Authenticator,
        response: AuthorizationResponse,
    ) -> Result<(), AuthError> {
        let pending = self
            .pending
            .take()
            .ok_or(AuthError::NoPendingAuthorization)?;
        let credentials = authenticator.exchange_code(pending, response).await?;

        info!(
            "logged in with {} scope(s), refresh token: {}",
            credentials.scopes.len(),
            credentials.refresh_token.is_some()
        );
        self.credentials = Some(Arc::new(Mutex::new(credentials)));
        Ok(())
    }

    #[cfg(test)]
    pub fn set_credentials(&mut self, credentials: CredentialSet) {
        self.credentials = Some(Arc::new(Mutex::new(credentials)));
    }

    /// Forget the current credentials so the next action requires a new login.
    pub fn drop_credentials(&mut self) {
        self.credentials = None;
        self.pending = None;
    }

    pub fn record_search(&mut self, query: &str, results: Vec<SearchResult>) {
        self.last_search = Some(LastSearch {
            query: query.to_owned(),
            results,
        });
    }

    pub fn last_search(&self) -> Option<&LastSearch> {
        self.last_search.as_ref()
    }

    pub fn clear_results(&mut self) {
        self.last_search = None;
    }

    /// Clear everything: credentials, pending login and results.
    pub fn reset(&mut self) {
        *self = Session::new();
    }
}
