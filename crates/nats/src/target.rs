//! Connection target resolution.
//!
//! Turns the user-facing [`Config`] into a [`ConnectionConfig`] once, before
//! the connection kernel exists. The resolved URI carries credentials and is
//! kept as a [`Secret`]; logs only ever see [`ConnectionConfig::redacted_uri`].

use std::{path::PathBuf, time::Duration};

use tracing::{debug, warn};
use url::Url;

use crate::{
    backoff::Backoff,
    config::{Config, Secret, DEFAULT_HOST, DEFAULT_PORT},
    error::BridgeError,
};

/// TLS material forwarded to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// Refuse plaintext connections.
    pub required: bool,
    pub ca_file: Option<PathBuf>,
    /// Client certificate and private key, always configured as a pair.
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

/// Fully resolved connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub uri: Secret,
    pub redacted_uri: String,
    pub tls: TlsSettings,
    pub has_credentials: bool,
    pub client_name: Option<String>,
    pub verbose: bool,
    pub pedantic: bool,
    pub reconnect_wait: Duration,
    pub max_reconnect_attempts: u32,
    pub connection_timeout: Duration,
    pub backoff_multiplier: f64,
    pub max_reconnect_delay: Duration,
}

impl ConnectionConfig {
    /// Resolves the target and copies the connection tunables out of `config`.
    pub fn from_config(config: &Config) -> Result<Self, BridgeError> {
        let target = resolve(config)?;

        let tls = if config.ssl {
            TlsSettings {
                required: true,
                ca_file: config.ca_file.as_ref().map(PathBuf::from),
                client_auth: config
                    .cert_file
                    .as_ref()
                    .zip(config.private_key_file.as_ref())
                    .map(|(cert, key)| (PathBuf::from(cert), PathBuf::from(key))),
            }
        } else {
            if config.ca_file.is_some() || config.cert_file.is_some() {
                warn!("TLS files are configured but 'ssl' is disabled; they will not be used");
            }
            TlsSettings::default()
        };

        Ok(Self {
            uri: target.uri,
            redacted_uri: target.redacted,
            tls,
            has_credentials: target.has_credentials,
            client_name: config.name.clone(),
            verbose: config.verbose,
            pedantic: config.pedantic,
            reconnect_wait: config.reconnect_wait(),
            max_reconnect_attempts: config.max_attempts(),
            connection_timeout: config.connection_timeout(),
            backoff_multiplier: config.reconnect_backoff_multiplier,
            max_reconnect_delay: config.max_reconnect_delay(),
        })
    }

    /// Retry pacing for this connection.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_wait,
            self.max_reconnect_delay.max(self.reconnect_wait),
            self.backoff_multiplier,
        )
        .with_max_attempts(Some(self.max_reconnect_attempts))
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub uri: Secret,
    pub redacted: String,
    pub has_credentials: bool,
    /// Explicitly set parameters that lost to `url`.
    pub ignored: Vec<&'static str>,
}

/// Computes the server URI.
///
/// `url` wins when present; any of `host`, `port`, `user`, `pass` that were
/// also set are reported in one warning. Otherwise the URI is
/// `nats://[user:pass@]host:port`, with the userinfo percent-encoded.
pub fn resolve(config: &Config) -> Result<ResolvedTarget, BridgeError> {
    if let Some(url) = &config.url {
        return resolve_explicit(config, url.expose());
    }

    let host = config.host.as_deref().unwrap_or(DEFAULT_HOST);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let authority = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let plain = format!("nats://{authority}");

    let mut parsed = Url::parse(&plain)
        .map_err(|e| BridgeError::Config(format!("Invalid host '{host}': {e}")))?;

    let (user, pass) = match (&config.user, &config.pass) {
        (None, None) => {
            debug!(uri = %plain, "Resolved connection target");
            return Ok(ResolvedTarget {
                uri: Secret::new(plain.clone()),
                redacted: plain,
                has_credentials: false,
                ignored: Vec::new(),
            });
        }
        (Some(user), Some(pass)) => (user, pass),
        (Some(_), None) => {
            return Err(BridgeError::Config(
                "Parameter 'user' is set without 'pass'".into(),
            ))
        }
        (None, Some(_)) => {
            return Err(BridgeError::Config(
                "Parameter 'pass' is set without 'user'".into(),
            ))
        }
    };

    let attach_err = || BridgeError::Config(format!("Cannot attach credentials to '{plain}'"));
    parsed.set_username(user).map_err(|_| attach_err())?;
    parsed
        .set_password(Some(pass.expose()))
        .map_err(|_| attach_err())?;

    let uri = parsed.to_string();
    let redacted = redact(&uri);
    debug!(uri = %redacted, "Resolved connection target");

    Ok(ResolvedTarget {
        uri: Secret::new(uri),
        redacted,
        has_credentials: true,
        ignored: Vec::new(),
    })
}

fn resolve_explicit(config: &Config, url: &str) -> Result<ResolvedTarget, BridgeError> {
    let mut has_credentials = false;
    for server in url.split(',') {
        let parsed = Url::parse(server.trim())
            .map_err(|e| BridgeError::Config(format!("Parameter 'url' is not a valid URL: {e}")))?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(BridgeError::Config(
                "Parameter 'url' has no host".into(),
            ));
        }
        has_credentials |= !parsed.username().is_empty() || parsed.password().is_some();
    }

    let ignored: Vec<&'static str> = [
        ("host", config.host.is_some()),
        ("port", config.port.is_some()),
        ("user", config.user.is_some()),
        ("pass", config.pass.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect();

    if !ignored.is_empty() {
        let names = ignored
            .iter()
            .map(|name| format!("'{name}'"))
            .collect::<Vec<_>>()
            .join(", ");
        warn!("Parameter 'url' is set, ignoring connection parameters: {names}");
    }

    let redacted = url
        .split(',')
        .map(|server| redact(server.trim()))
        .collect::<Vec<_>>()
        .join(",");
    debug!(uri = %redacted, "Resolved connection target");

    Ok(ResolvedTarget {
        uri: Secret::new(url),
        redacted,
        has_credentials,
        ignored,
    })
}

/// Masks the password, or a bare token in the username position.
pub fn redact(uri: &str) -> String {
    let Ok(mut parsed) = Url::parse(uri) else {
        return "<invalid url>".to_string();
    };

    let masked = if parsed.password().is_some() {
        parsed.set_password(Some("***")).is_ok()
    } else if !parsed.username().is_empty() {
        parsed.set_username("***").is_ok()
    } else {
        true
    };

    if masked {
        parsed.to_string()
    } else {
        "<redacted>".to_string()
    }
}
