//! Channel protocol module
//!
//! Typed wire messages, the duplex WebSocket channel, and endpoint
//! construction. Setup-before-media ordering is enforced by the session
//! controller, not here.

mod channel;
mod messages;

pub use channel::{ChannelEvent, LiveChannel};
pub use messages::{ClientMessage, PCM_MIME_TYPE, ServerEvent, ServerMessage};

use url::Url;

use crate::config::SessionConfig;
use crate::{Error, Result};

/// Hosted endpoint for the duplex speech API
const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Build the connection URL for a session
///
/// With a proxy configured the proxy endpoint is used as-is and credentials
/// are injected server-side, never on this channel. Without one, the API
/// key is embedded in the hosted endpoint URL.
///
/// # Errors
///
/// Returns [`Error::Config`] if neither proxy nor API key is configured, or
/// if the proxy endpoint is not a valid URL. Nothing is acquired before
/// this check.
pub fn endpoint_url(config: &SessionConfig) -> Result<String> {
    if let Some(proxy) = &config.proxy {
        Url::parse(proxy).map_err(|e| Error::Config(format!("invalid proxy endpoint: {e}")))?;
        return Ok(proxy.clone());
    }

    let key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::Config(
                "no credential: set GEMINI_API_KEY or configure a proxy endpoint".to_string(),
            )
        })?;

    let mut url = Url::parse(LIVE_ENDPOINT).map_err(|e| Error::Config(e.to_string()))?;
    url.query_pairs_mut().append_pair("key", key);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_embeds_api_key() {
        let config = SessionConfig {
            api_key: Some("k-123".to_string()),
            ..SessionConfig::default()
        };

        let url = endpoint_url(&config).unwrap();
        assert!(url.starts_with("wss://generativelanguage.googleapis.com/"));
        assert!(url.ends_with("?key=k-123"));
    }

    #[test]
    fn test_proxy_takes_precedence_and_carries_no_key() {
        let config = SessionConfig {
            api_key: Some("k-123".to_string()),
            proxy: Some("wss://proxy.example.com/live".to_string()),
            ..SessionConfig::default()
        };

        let url = endpoint_url(&config).unwrap();
        assert_eq!(url, "wss://proxy.example.com/live");
        assert!(!url.contains("k-123"));
    }

    #[test]
    fn test_missing_credential_is_a_config_error() {
        let config = SessionConfig::default();
        assert!(matches!(endpoint_url(&config), Err(Error::Config(_))));

        let config = SessionConfig {
            api_key: Some(String::new()),
            ..SessionConfig::default()
        };
        assert!(matches!(endpoint_url(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_proxy_is_a_config_error() {
        let config = SessionConfig {
            proxy: Some("not a url".to_string()),
            ..SessionConfig::default()
        };
        assert!(matches!(endpoint_url(&config), Err(Error::Config(_))));
    }
}
