//! Consistency tokens binding responses to store revisions.
//!
//! Every mutating or resolving operation returns an opaque token
//! encoding the revision it observed. A caller that plays a token back
//! with `at_least_as_fresh` is guaranteed to never read state older
//! than that revision, which closes the window where a freshly revoked
//! permission could still appear granted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use muster_types::{ConsistencyMode, Revision};

use crate::{ResolveError, Result};

const TOKEN_VERSION: &str = "v1";

/// An opaque consistency token as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyToken(String);

impl ConsistencyToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lowest revision a request is allowed to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionFloor {
    /// Whatever the store currently reports as head.
    Latest,
    /// At least this revision; fail if the store lags behind it.
    AtLeast(Revision),
}

/// Mints and parses consistency tokens.
///
/// Tokens are versioned so the encoding can change without breaking
/// callers that treat them as opaque strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenManager;

impl TokenManager {
    pub fn new() -> Self {
        Self
    }

    /// Encode a revision into an opaque token.
    pub fn issue(&self, revision: Revision) -> ConsistencyToken {
        let payload = format!("{TOKEN_VERSION}:{}", revision.0);
        ConsistencyToken(STANDARD.encode(payload))
    }

    /// Decode a token back into the revision it carries.
    pub fn resolve(&self, token: &str) -> Result<Revision> {
        let bytes = STANDARD
            .decode(token)
            .map_err(|_| ResolveError::InvalidToken("malformed encoding".to_string()))?;
        let payload = String::from_utf8(bytes)
            .map_err(|_| ResolveError::InvalidToken("malformed payload".to_string()))?;

        let (version, raw) = payload
            .split_once(':')
            .ok_or_else(|| ResolveError::InvalidToken("malformed payload".to_string()))?;
        if version != TOKEN_VERSION {
            return Err(ResolveError::InvalidToken(format!(
                "unsupported token version {version}"
            )));
        }

        let value: u64 = raw
            .parse()
            .map_err(|_| ResolveError::InvalidToken("malformed revision".to_string()))?;
        Ok(Revision(value))
    }

    /// Turn a request's token and consistency mode into a revision
    /// floor. A present token is validated in both modes; it only
    /// raises the floor under `at_least_as_fresh`.
    pub fn floor_for_request(
        &self,
        token: Option<&str>,
        mode: ConsistencyMode,
    ) -> Result<RevisionFloor> {
        match (mode, token) {
            (_, None) => Ok(RevisionFloor::Latest),
            (ConsistencyMode::MinimizeLatency, Some(token)) => {
                self.resolve(token)?;
                Ok(RevisionFloor::Latest)
            },
            (ConsistencyMode::AtLeastAsFresh, Some(token)) => {
                Ok(RevisionFloor::AtLeast(self.resolve(token)?))
            },
        }
    }
}
