use std::time::Duration;

use oauth2::url::Url;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, trace};

use super::AuthError;

const SUCCESS_PAGE: &str = "<html><body><h3>Connected to Google Drive.</h3>\
<p>You can close this tab and return to the terminal.</p></body></html>";

/// Query parameters delivered to the redirect address by Google.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl AuthorizationResponse {
    pub fn from_url(url: &Url) -> AuthorizationResponse {
        let mut response = AuthorizationResponse::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => response.code = Some(value.into_owned()),
                "state" => response.state = Some(value.into_owned()),
                "error" => response.error = Some(value.into_owned()),
                _ => (),
            }
        }
        response
    }

    /// Parse a redirect URL pasted by the user.
    pub fn parse_redirect(redirect: &str) -> Result<AuthorizationResponse, AuthError> {
        let url = Url::parse(redirect.trim())?;
        Ok(AuthorizationResponse::from_url(&url))
    }

    /// Check the response against the state of the pending login and return its code.
    pub fn into_code(self, expected_state: &str) -> Result<String, AuthError> {
        if let Some(error) = self.error {
            return Err(AuthError::Denied(error));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(AuthError::StateMismatch);
        }
        self.code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCode)
    }
}

/// How long a connection may stay silent before it is dropped. Browsers
/// open speculative connections that never carry a request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Listen on the address of `redirect_uri` until the browser is redirected
/// back to it, or until `timeout` passes.
pub async fn wait_for_redirect(
    redirect_uri: &str,
    timeout: Duration,
) -> Result<AuthorizationResponse, AuthError> {
    let base = Url::parse(redirect_uri)?;
    let host = base.host_str().unwrap_or("localhost").to_owned();
    let port = base.port_or_known_default().unwrap_or(80);

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("waiting for authorization redirect on {host}:{port}");

    tokio::time::timeout(
        timeout,
        accept_redirect(&listener, &base, REQUEST_READ_TIMEOUT),
    )
    .await
    .map_err(|_| AuthError::CallbackTimeout)?
}

/// Accept connections until one hits the redirect path. Other paths (like
/// the browser asking for a favicon) get a 404, malformed requests get a
/// 400, and connections silent for `read_timeout` are dropped.
pub async fn accept_redirect(
    listener: &TcpListener,
    base: &Url,
    read_timeout: Duration,
) -> Result<AuthorizationResponse, AuthError> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        trace!("callback connection from {peer}");

        let target =
            match tokio::time::timeout(read_timeout, read_request_target(&mut stream)).await {
                Ok(Ok(Some(target))) => target,
                Ok(Ok(None)) => {
                    reject(&mut stream, "400 Bad Request", "Bad request").await;
                    continue;
                }
                Ok(Err(e)) => {
                    debug!("could not read request from {peer}: {e}");
                    continue;
                }
                Err(_) => {
                    debug!("no request from {peer} within {read_timeout:?}, dropping it");
                    continue;
                }
            };

        let url = match base.join(&target) {
            Ok(url) => url,
            Err(e) => {
                debug!("bad request target {target:?}: {e}");
                reject(&mut stream, "400 Bad Request", "Bad request").await;
                continue;
            }
        };
        if url.path() != base.path() {
            debug!("ignoring request for {}", url.path());
            reject(&mut stream, "404 Not Found", "Not found").await;
            continue;
        }

        let response = AuthorizationResponse::from_url(&url);
        respond(&mut stream, "200 OK", SUCCESS_PAGE).await?;
        return Ok(response);
    }
}

/// Answer a request that is not the redirect. The listener keeps going even
/// if the client has already gone away.
async fn reject(stream: &mut TcpStream, status: &str, body: &str) {
    if let Err(e) = respond(stream, status, body).await {
        debug!("could not answer rejected request: {e}");
    }
}

/// Read the request head and return the request target of a GET.
async fn read_request_target(stream: &mut TcpStream) -> Result<Option<String>, AuthError> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain the headers so the browser sees a clean response.
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_owned())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<(), AuthError> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
