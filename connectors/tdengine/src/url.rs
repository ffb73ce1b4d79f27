//! Connection URL parsing.
//!
//! Accepted forms:
//!
//! ```text
//! jdbc:TAOS://host:port/db?user=root&password=taosdata
//! jdbc:TAOS-RS://host:port
//! taos://host:port
//! http://host:port
//! ```

use std::fmt;
use tdengine_connect_core::{ConnectorError, ConnectorResult};
use url::Url;

/// Default taosAdapter REST port
pub const DEFAULT_PORT: u16 = 6041;

const SCHEMES: &[&str] = &["taos", "taos-rs", "taos-ws", "taos+http", "http", "https"];

/// Validated connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    base: Url,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl ConnectionUrl {
    pub fn parse(raw: &str) -> ConnectorResult<Self> {
        let trimmed = raw.trim();
        let without_jdbc = match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
            _ => trimmed,
        };

        let (scheme, rest) = without_jdbc.split_once("://").ok_or_else(|| {
            ConnectorError::config(format!(
                "invalid connection url '{}': expected jdbc:TAOS://host:port",
                raw
            ))
        })?;

        let scheme = scheme.to_ascii_lowercase();
        if !SCHEMES.contains(&scheme.as_str()) {
            return Err(ConnectorError::config(format!(
                "unsupported connection url prefix '{}' in '{}'",
                scheme, raw
            )));
        }

        let transport = if scheme == "https" { "https" } else { "http" };
        let parsed = Url::parse(&format!("{}://{}", scheme, rest)).map_err(|e| {
            ConnectorError::config(format!("invalid connection url '{}': {}", raw, e))
        })?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectorError::config(format!("connection url '{}' has no host", raw)))?
            .to_string();
        // taos schemes have no registered default port
        let port = if scheme.starts_with("http") {
            parsed.port_or_known_default()
        } else {
            parsed.port()
        }
        .unwrap_or(DEFAULT_PORT);

        let database = Some(parsed.path().trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let mut user = None;
        let mut password = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "user" => user = Some(value.into_owned()),
                "password" => password = Some(value.into_owned()),
                _ => {}
            }
        }

        let base = Url::parse(&format!("{}://{}:{}", transport, host, port)).map_err(|e| {
            ConnectorError::config(format!("invalid connection url '{}': {}", raw, e))
        })?;

        Ok(Self {
            base,
            database,
            user,
            password,
        })
    }

    /// Scheme, host and port of the REST endpoint
    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(DEFAULT_PORT)
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // credentials stay out of logs
        write!(f, "{}", self.base.as_str().trim_end_matches('/'))?;
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jdbc_url() {
        let url = ConnectionUrl::parse("jdbc:TAOS://td1:6030/power?user=root&password=taosdata")
            .unwrap();
        assert_eq!(url.host(), "td1");
        assert_eq!(url.port(), 6030);
        assert_eq!(url.database(), Some("power"));
        assert_eq!(url.user(), Some("root"));
        assert_eq!(url.password(), Some("taosdata"));
        assert_eq!(url.to_string(), "http://td1:6030/power");
    }

    #[test]
    fn test_prefix_variants() {
        for raw in [
            "jdbc:TAOS-RS://localhost:6041",
            "JDBC:taos://localhost",
            "taos://localhost:6041/",
            "http://localhost:6041",
        ] {
            let url = ConnectionUrl::parse(raw).unwrap();
            assert_eq!(url.host(), "localhost", "{}", raw);
            assert_eq!(url.port(), 6041, "{}", raw);
            assert_eq!(url.database(), None, "{}", raw);
        }

        let tls = ConnectionUrl::parse("https://cloud.example").unwrap();
        assert_eq!(tls.base().scheme(), "https");
        assert_eq!(tls.port(), 443);
    }

    #[test]
    fn test_rejected_urls() {
        for raw in [
            "jdbc:mysql://localhost:3306",
            "localhost:6041",
            "taos://",
            "",
        ] {
            let err = ConnectionUrl::parse(raw).unwrap_err();
            assert!(
                matches!(err, ConnectorError::Configuration(_)),
                "{}: {}",
                raw,
                err
            );
        }
    }
}
