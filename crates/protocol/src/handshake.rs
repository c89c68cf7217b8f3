//! Handshake parameters carried on connect.
//!
//! The client encodes everything the daemon needs into the connect URL query
//! string: the session id, the initial geometry, and an override bag that is
//! consulted only if the session must be (re)spawned. Geometry travels in the
//! handshake because it determines how the remote shell wraps its first
//! output; resizing after the fact cannot repair mis-wrapped scrollback.

use url::Url;

use crate::error::{ProtocolError, Result};
use crate::messages::clamp_geometry;

/// Spawn configuration overrides supplied by the connecting client.
///
/// Consulted only when no live process exists for the session id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOverrides {
    /// Command to run instead of the stored or default one.
    pub command: Option<String>,
    /// Working directory for the spawned process.
    pub cwd: Option<String>,
    /// Resume token appended to the command line as `--resume <token>`.
    pub resume: Option<String>,
    /// Skip interactive permission prompts in the hosted agent.
    pub bypass_permissions: bool,
    /// Run the hosted agent with verbose output.
    pub verbose: bool,
    /// Model selector appended as `--model <name>`.
    pub model: Option<String>,
}

/// Everything a connection declares when it attaches to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachParams {
    /// Identifier of the session to attach to.
    pub session_id: String,
    /// Initial terminal width, clamped to the accepted range.
    pub cols: u16,
    /// Initial terminal height, clamped to the accepted range.
    pub rows: u16,
    /// Spawn overrides, used only if the session must be (re)spawned.
    pub overrides: SpawnOverrides,
}

impl AttachParams {
    /// Creates attach parameters with the given geometry and no overrides.
    pub fn new(session_id: impl Into<String>, cols: u16, rows: u16) -> Self {
        let (cols, rows) = clamp_geometry(cols as i64, rows as i64);
        Self {
            session_id: session_id.into(),
            cols,
            rows,
            overrides: SpawnOverrides::default(),
        }
    }

    /// Builds the full connect URL for a daemon at `base` (e.g. `ws://host:port`).
    pub fn connect_url(&self, base: &str) -> Result<Url> {
        let mut url = Url::parse(base)?;
        url.set_path("/attach");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("session", &self.session_id);
            query.append_pair("cols", &self.cols.to_string());
            query.append_pair("rows", &self.rows.to_string());
            if let Some(ref cmd) = self.overrides.command {
                query.append_pair("cmd", cmd);
            }
            if let Some(ref cwd) = self.overrides.cwd {
                query.append_pair("cwd", cwd);
            }
            if let Some(ref resume) = self.overrides.resume {
                query.append_pair("resume", resume);
            }
            if let Some(ref model) = self.overrides.model {
                query.append_pair("model", model);
            }
            if self.overrides.bypass_permissions {
                query.append_pair("bypass", "1");
            }
            if self.overrides.verbose {
                query.append_pair("verbose", "1");
            }
        }
        Ok(url)
    }

    /// Parses attach parameters from an incoming request URI.
    ///
    /// The session id is required; geometry defaults to 80x24 and is clamped.
    pub fn from_request_uri(uri: &str) -> Result<Self> {
        // The HTTP request line carries only path + query; give Url a base.
        let url = Url::parse("ws://daemon")
            .expect("static base url")
            .join(uri)?;

        let mut session_id = None;
        let mut cols: i64 = 80;
        let mut rows: i64 = 24;
        let mut overrides = SpawnOverrides::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "session" => session_id = Some(value.into_owned()),
                "cols" => cols = parse_dim("cols", &value)?,
                "rows" => rows = parse_dim("rows", &value)?,
                "cmd" => overrides.command = Some(value.into_owned()),
                "cwd" => overrides.cwd = Some(value.into_owned()),
                "resume" => overrides.resume = Some(value.into_owned()),
                "model" => overrides.model = Some(value.into_owned()),
                "bypass" => overrides.bypass_permissions = value == "1" || value == "true",
                "verbose" => overrides.verbose = value == "1" || value == "true",
                _ => {}
            }
        }

        let session_id = session_id.ok_or(ProtocolError::MissingParam { name: "session" })?;
        if session_id.is_empty() {
            return Err(ProtocolError::MissingParam { name: "session" });
        }

        let (cols, rows) = clamp_geometry(cols, rows);
        Ok(Self {
            session_id,
            cols,
            rows,
            overrides,
        })
    }
}

fn parse_dim(name: &'static str, value: &str) -> Result<i64> {
    value.parse().map_err(|_| ProtocolError::InvalidParam {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_url_minimal() {
        let params = AttachParams::new("s1", 80, 24);
        let url = params.connect_url("ws://127.0.0.1:7070").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:7070/attach?session=s1&cols=80&rows=24"
        );
    }

    #[test]
    fn test_connect_url_with_overrides() {
        let mut params = AttachParams::new("s1", 120, 40);
        params.overrides.command = Some("claude".to_string());
        params.overrides.resume = Some("tok-123".to_string());
        params.overrides.bypass_permissions = true;
        let url = params.connect_url("ws://host:9").unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("cmd=claude"));
        assert!(query.contains("resume=tok-123"));
        assert!(query.contains("bypass=1"));
        assert!(!query.contains("verbose"));
    }

    #[test]
    fn test_roundtrip_through_request_uri() {
        let mut params = AttachParams::new("sess-42", 100, 30);
        params.overrides.cwd = Some("/tmp/work dir".to_string());
        params.overrides.model = Some("opus".to_string());
        params.overrides.verbose = true;
        let url = params.connect_url("ws://h").unwrap();
        let uri = format!("{}?{}", url.path(), url.query().unwrap());
        let parsed = AttachParams::from_request_uri(&uri).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_from_request_uri_requires_session() {
        let err = AttachParams::from_request_uri("/attach?cols=80").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingParam { name: "session" }
        ));
    }

    #[test]
    fn test_from_request_uri_defaults_geometry() {
        let params = AttachParams::from_request_uri("/attach?session=s1").unwrap();
        assert_eq!((params.cols, params.rows), (80, 24));
    }

    #[test]
    fn test_from_request_uri_clamps_geometry() {
        let params =
            AttachParams::from_request_uri("/attach?session=s1&cols=10000&rows=0").unwrap();
        assert_eq!((params.cols, params.rows), (500, 1));
    }

    #[test]
    fn test_from_request_uri_rejects_non_numeric_dims() {
        let err = AttachParams::from_request_uri("/attach?session=s1&cols=wide").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParam { name: "cols", .. }));
    }
}
