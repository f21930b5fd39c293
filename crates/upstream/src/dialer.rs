//! Upstream dialer (spec.md §4.3): resolves the per-agent WebSocket URL and
//! opens an authenticated connection to the AI provider.
//!
//! Grounded in `sa_providers::registry::ProviderRegistry::from_config` for
//! the "resolve config, construct client, mask secrets on failure" shape,
//! and `sa_providers::anthropic::AnthropicProvider::from_config` for
//! attaching a bounded timeout around the dial.

use std::time::Duration;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vrelay_domain::error::{Error, Result};
use vrelay_domain::ids::AgentId;

/// Full-duplex handle to the upstream provider. A thin alias over the
/// `tokio-tungstenite` stream type — the relay core reads/writes it the
/// same way it reads/writes the learner's `axum` socket, just through a
/// different split.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Mask a secret the same way `sa_providers::registry::mask_secrets` does,
/// so a dial failure's error message never echoes the raw API key.
fn mask(secret: &str) -> String {
    if secret.len() > 8 {
        format!("{}...{}", &secret[..4], &secret[secret.len() - 4..])
    } else {
        "***masked***".to_string()
    }
}

pub struct DialRequest<'a> {
    pub agent_id: &'a AgentId,
    /// Explicit websocket URL carried on the session record, if any.
    pub websocket_url: Option<&'a str>,
    /// Base URL to synthesize `{base}/{agent_id}` from when no explicit
    /// URL is set.
    pub ws_base: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub dial_timeout: Duration,
}

fn resolve_url(req: &DialRequest<'_>) -> Result<String> {
    if let Some(url) = req.websocket_url {
        return Ok(url.to_string());
    }
    let base = req.ws_base.ok_or_else(|| {
        Error::UpstreamConnect("no websocket_url on session and no upstream.ws_base configured".into())
    })?;
    Ok(format!("{}/{}", base.trim_end_matches('/'), req.agent_id))
}

/// Open and authenticate a WebSocket to the upstream AI provider.
///
/// Fails with `Error::UpstreamConnect` if the URL can't be resolved, the
/// dial doesn't complete within `dial_timeout`, or the handshake itself
/// errors.
pub async fn dial(req: DialRequest<'_>) -> Result<UpstreamSocket> {
    let url = resolve_url(&req)?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::UpstreamConnect(format!("invalid upstream url: {e}")))?;

    if let Some(key) = req.api_key {
        let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
            Error::UpstreamConnect(format!("invalid api key header ({}): {e}", mask(key)))
        })?;
        request.headers_mut().insert("Authorization", value);
    }

    let dial = connect_async(request);
    match tokio::time::timeout(req.dial_timeout, dial).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(Error::UpstreamConnect(format!("{url}: {e}"))),
        Err(_) => Err(Error::UpstreamConnect(format!(
            "{url}: dial timed out after {:?}",
            req.dial_timeout
        ))),
    }
}
