use std::{borrow::Cow, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use oauth2::AccessToken;
use reqwest::{Client, Response};
use tracing::{debug, trace, warn};

use super::{DriveError, DriveProvider, FileQuery};
use crate::{
    auth::Authenticator,
    config::HttpConfig,
    session::SharedCredentials,
    types::{FileList, FileMetadata, GErrorTop},
};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, modifiedTime, size, parents, webViewLink, thumbnailLink, iconLink)";

/// First retry waits this long, doubling on each further attempt.
const BACKOFF_BASE_MS: u64 = 200;

const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Drive v3 client for one logged-in session.
#[derive(Debug)]
pub struct GDriveClient {
    http_client: Client,
    authenticator: Arc<Authenticator>,
    credentials: SharedCredentials,
    max_retries: u32,
    api_base: String,
}

impl GDriveClient {
    pub fn new(
        http: &HttpConfig,
        authenticator: Arc<Authenticator>,
        credentials: SharedCredentials,
    ) -> Result<GDriveClient, DriveError> {
        let http_client = Client::builder()
            .referer(false)
            .timeout(http.timeout())
            .connect_timeout(http.connect_timeout())
            .build()?;

        Ok(GDriveClient {
            http_client,
            authenticator,
            credentials,
            max_retries: http.max_retries,
            api_base: DRIVE_API_BASE.to_owned(),
        })
    }

    /// Point the client at another API root.
    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> GDriveClient {
        self.api_base = api_base.trim_end_matches('/').to_owned();
        self
    }

    /// Current access token, refreshed first if it is about to expire.
    async fn access_token(&self) -> Result<AccessToken, DriveError> {
        let mut creds = self.credentials.lock().await;
        if creds.is_expired(Utc::now()) {
            debug!("access token expired, refreshing");
            self.authenticator.refresh(&mut creds).await?;
        }
        Ok(creds.access_token.clone())
    }

    /// Refresh the access token after a 401, unless someone else already
    /// replaced `old_access_token` in the meantime.
    async fn refresh_access_token(
        &self,
        old_access_token: &AccessToken,
    ) -> Result<AccessToken, DriveError> {
        let mut creds = self.credentials.lock().await;
        if creds.access_token.secret() != old_access_token.secret() {
            return Ok(creds.access_token.clone());
        }
        self.authenticator.refresh(&mut creds).await?;
        Ok(creds.access_token.clone())
    }

    /// GET `url`, retrying rate limits, server errors and transport failures
    /// with exponential backoff, and refreshing the token once on a 401.
    async fn get(
        &self,
        url: &str,
        query: &[(&str, Cow<'_, str>)],
    ) -> Result<Response, DriveError> {
        let mut access_token = self.access_token().await?;
        let mut refreshed = false;
        let mut attempt = 0;

        loop {
            trace!("GET {url} (attempt {attempt})");
            let res = self
                .http_client
                .get(url)
                .bearer_auth(access_token.secret())
                .query(query)
                .send()
                .await;

            match res {
                Ok(r) => match r.status().as_u16() {
                    // Everything's good
                    200 => return Ok(r),
                    // Bad access token, refresh it and retry request
                    401 if !refreshed => {
                        debug!("access token rejected, refreshing");
                        access_token = self.refresh_access_token(&access_token).await?;
                        refreshed = true;
                        continue;
                    }
                    // Drive reports some rate limits as 403
                    403 => {
                        let body = r.text().await.unwrap_or_default();
                        if attempt < self.max_retries && is_rate_limited(&body) {
                            attempt += 1;
                            self.wait_before_retry(attempt, "rate limited (403)").await;
                        } else {
                            return Err(error_from_body(403, body));
                        }
                    }
                    // Rate limit or server error, retry request
                    status @ (429 | 500..=599) if attempt < self.max_retries => {
                        attempt += 1;
                        self.wait_before_retry(attempt, &format!("status {status}"))
                            .await;
                    }
                    status => return Err(api_error(status, r).await),
                },
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    attempt += 1;
                    self.wait_before_retry(attempt, &e.to_string()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn wait_before_retry(&self, attempt: u32, cause: &str) {
        let backoff = backoff(attempt);
        warn!(
            "Drive request failed: {cause} (attempt {attempt}/{}), retrying in {}ms",
            self.max_retries,
            backoff.as_millis()
        );
        tokio::time::sleep(backoff).await;
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1)))
}

/// Timeouts, refused connections and connections dropped mid-request.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

/// Whether an error body carries one of Drive's rate-limit reasons.
fn is_rate_limited(body: &str) -> bool {
    serde_json::from_str::<GErrorTop>(body)
        .map(|e| {
            e.error
                .errors
                .iter()
                .any(|err| RATE_LIMIT_REASONS.contains(&err.reason.as_str()))
        })
        .unwrap_or(false)
}

/// Turn a failed response into an error, using Google's error message when
/// the body has one.
async fn api_error(status: u16, r: Response) -> DriveError {
    let body = r.text().await.unwrap_or_default();
    error_from_body(status, body)
}

fn error_from_body(status: u16, body: String) -> DriveError {
    let message = match serde_json::from_str::<GErrorTop>(&body) {
        Ok(e) => e.error.message,
        Err(_) => body,
    };
    DriveError::Api { status, message }
}

#[async_trait]
impl DriveProvider for GDriveClient {
    fn get_provider_type(&self) -> &'static str {
        "gdrive"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileMetadata>, DriveError> {
        let q = query.to_drive_query();
        debug!("listing files with q = {q}");

        let params = vec![
            ("alt", Cow::Borrowed("json")),
            ("prettyPrint", Cow::Borrowed("false")),
            ("pageSize", Cow::Owned(query.max_results.to_string())),
            ("fields", Cow::Borrowed(LIST_FIELDS)),
            ("q", Cow::Owned(q)),
        ];

        let url = format!("{}/files", self.api_base);
        let page = self.get(&url, &params).await?.json::<FileList>().await?;
        Ok(page.files)
    }

    async fn export_file(&self, file_id: &str, mime_type: &str) -> Result<Bytes, DriveError> {
        let url = format!("{}/files/{}/export", self.api_base, file_id);
        let params = [("mimeType", Cow::Borrowed(mime_type))];
        Ok(self.get(&url, &params).await?.bytes().await?)
    }

    async fn download_file(&self, file_id: &str) -> Result<Bytes, DriveError> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        let params = [("alt", Cow::Borrowed("media"))];
        Ok(self.get(&url, &params).await?.bytes().await?)
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration as ChronoDuration;
    use oauth2::RefreshToken;
    use tokio::{
        io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        sync::Mutex,
        task::JoinHandle,
    };

    use super::*;
    use crate::{
        auth::{
            test::{test_config, test_credentials},
            AuthError, CredentialSet,
        },
        types::Category,
    };

    const TOKEN_RESPONSE: &str =
        r#"{"access_token": "fresh", "token_type": "bearer", "expires_in": 3600}"#;

    /// Closes the connection after reading the request, without answering.
    const DROP: u16 = 0;

    #[derive(Debug)]
    struct Seen {
        request_line: String,
        authorization: Option<String>,
    }

    /// Serve `responses` in order, one per connection, and hand back what
    /// was received.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Seen>>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut reader = BufReader::new(&mut stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).await.unwrap();

                let mut authorization = None;
                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    let n = reader.read_line(&mut header).await.unwrap();
                    if n == 0 || header.trim_end().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.trim_end().split_once(": ") {
                        match name.to_ascii_lowercase().as_str() {
                            "authorization" => authorization = Some(value.to_owned()),
                            "content-length" => content_length = value.parse().unwrap(),
                            _ => (),
                        }
                    }
                }
                let mut request_body = vec![0; content_length];
                reader.read_exact(&mut request_body).await.unwrap();

                seen.push(Seen {
                    request_line: request_line.trim_end().to_owned(),
                    authorization,
                });

                if status != DROP {
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    stream.write_all(response.as_bytes()).await.unwrap();
                }
                stream.shutdown().await.unwrap();
            }
            seen
        });

        (base, handle)
    }

    /// A client for `base` whose token endpoint is also `base`.
    fn client_with(base: &str, credentials: CredentialSet) -> GDriveClient {
        let http = HttpConfig {
            timeout_secs: 5,
            connect_timeout_secs: 5,
            max_retries: 2,
            callback_timeout_secs: 5,
        };
        let mut google = test_config();
        google.token_url = format!("{base}/token");
        let authenticator = Arc::new(Authenticator::new(&google).unwrap());
        GDriveClient::new(&http, authenticator, Arc::new(Mutex::new(credentials)))
            .unwrap()
            .with_api_base(base)
    }

    fn client(base: &str) -> GDriveClient {
        client_with(base, test_credentials())
    }

    fn refreshable_credentials() -> CredentialSet {
        CredentialSet {
            refresh_token: Some(RefreshToken::new("refresh".to_owned())),
            ..test_credentials()
        }
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn rate_limit_reasons() {
        assert!(is_rate_limited(
            r#"{"error": {"errors": [{"reason": "userRateLimitExceeded"}], "message": "slow down"}}"#
        ));
        assert!(!is_rate_limited(
            r#"{"error": {"errors": [{"reason": "insufficientFilePermissions"}], "message": "no"}}"#
        ));
        assert!(!is_rate_limited("not json"));
    }

    #[tokio::test]
    async fn list_sends_query_and_parses_files() {
        let (base, server) = serve(vec![(
            200,
            r#"{"files": [{"id": "1", "name": "Budget", "mimeType": "application/vnd.google-apps.spreadsheet"}]}"#,
        )])
        .await;

        let files = client(&base)
            .list_files(&FileQuery::search("budget", Category::Spreadsheets, 20))
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "Budget");

        let seen = server.await.unwrap();
        assert!(seen[0].request_line.starts_with("GET /files?"));
        assert!(seen[0].request_line.contains("pageSize=20"));
        assert!(seen[0].request_line.contains("fullText+contains+%27budget%27"));
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer access"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (base, server) = serve(vec![(503, "busy"), (200, "exported text")]).await;

        let bytes = client(&base).export_file("doc1", "text/plain").await.unwrap();
        assert_eq!(&bytes[..], b"exported text");

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1]
            .request_line
            .starts_with("GET /files/doc1/export?mimeType=text%2Fplain"));
    }

    #[tokio::test]
    async fn dropped_connections_are_retried() {
        let (base, server) = serve(vec![(DROP, ""), (200, "content")]).await;

        let bytes = client(&base).download_file("f").await.unwrap();
        assert_eq!(&bytes[..], b"content");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (base, server) = serve(vec![(500, "a"), (500, "b"), (500, "c")]).await;

        match client(&base).download_file("f").await {
            Err(DriveError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "c");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(server.await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rate_limited_403_is_retried() {
        let (base, server) = serve(vec![
            (
                403,
                r#"{"error": {"errors": [{"domain": "usageLimits", "reason": "rateLimitExceeded", "message": "Rate Limit Exceeded"}], "code": 403, "message": "Rate Limit Exceeded"}}"#,
            ),
            (200, "content"),
        ])
        .await;

        let bytes = client(&base).download_file("f").await.unwrap();
        assert_eq!(&bytes[..], b"content");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_403_is_not_retried() {
        let (base, server) = serve(vec![(
            403,
            r#"{"error": {"errors": [{"reason": "cannotDownloadAbusiveFile"}], "code": 403, "message": "This file has been identified as malware."}}"#,
        )])
        .await;

        match client(&base).download_file("f").await {
            Err(DriveError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "This file has been identified as malware.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_errors_carry_google_message() {
        let (base, _server) = serve(vec![(
            404,
            r#"{"error": {"errors": [], "code": 404, "message": "File not found: nope."}}"#,
        )])
        .await;

        match client(&base).download_file("nope").await {
            Err(DriveError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "File not found: nope.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_is_auth_error() {
        let (base, _server) = serve(vec![(401, "{}")]).await;

        let res = client(&base).download_file("f").await;
        assert!(matches!(
            res,
            Err(DriveError::Auth(AuthError::NoRefreshToken))
        ));
    }

    #[tokio::test]
    async fn unauthorized_refreshes_token_and_retries() {
        let (base, server) = serve(vec![
            (401, "{}"),
            (200, TOKEN_RESPONSE),
            (200, "content"),
        ])
        .await;

        let client = client_with(&base, refreshable_credentials());
        let bytes = client.download_file("f").await.unwrap();
        assert_eq!(&bytes[..], b"content");

        let seen = server.await.unwrap();
        assert_eq!(seen[0].request_line, "GET /files/f?alt=media HTTP/1.1");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer access"));
        assert_eq!(seen[1].request_line, "POST /token HTTP/1.1");
        assert_eq!(seen[2].request_line, "GET /files/f?alt=media HTTP/1.1");
        assert_eq!(seen[2].authorization.as_deref(), Some("Bearer fresh"));

        let creds = client.credentials.lock().await;
        assert_eq!(creds.access_token.secret(), "fresh");
        assert_eq!(
            creds.refresh_token.as_ref().map(|t| t.secret().as_str()),
            Some("refresh")
        );
    }

    #[tokio::test]
    async fn second_unauthorized_is_an_error() {
        let (base, server) = serve(vec![
            (401, "{}"),
            (200, TOKEN_RESPONSE),
            (
                401,
                r#"{"error": {"errors": [], "code": 401, "message": "Invalid Credentials"}}"#,
            ),
        ])
        .await;

        match client_with(&base, refreshable_credentials())
            .download_file("f")
            .await
        {
            Err(DriveError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Credentials");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(server.await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_request() {
        let (base, server) = serve(vec![(200, TOKEN_RESPONSE), (200, "content")]).await;

        let mut creds = refreshable_credentials();
        creds.expires_at = Some(Utc::now() - ChronoDuration::hours(1));
        let bytes = client_with(&base, creds).download_file("f").await.unwrap();
        assert_eq!(&bytes[..], b"content");

        let seen = server.await.unwrap();
        assert_eq!(seen[0].request_line, "POST /token HTTP/1.1");
        assert_eq!(seen[1].authorization.as_deref(), Some("Bearer fresh"));
    }
}
