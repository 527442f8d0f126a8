//! Token records and token-response normalization.
//!
//! Providers disagree on how a token response looks: some wrap the fields in
//! a `data` / `token` / `tokens` / `result` object, some use camelCase, some
//! send `expires_in` as a string. [`normalize`] runs an ordered list of shape
//! matchers over the JSON body and produces one [`RawTokenFields`], which is
//! then validated into a [`TokenRecord`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AuthError, Result};

/// Lifetime assumed when the provider omits `expires_in` (2 hours).
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 7200;

/// Token type assumed when the provider omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Wrapper members probed by the nested matcher, in order.
const WRAPPER_KEYS: &[&str] = &["data", "token", "tokens", "result"];

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// The persisted credential set.
///
/// `access_token`, `refresh_token` and `instance_url` are always non-empty;
/// a response that cannot satisfy this never becomes a record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Base URL of the tenant the tokens are valid for.
    pub instance_url: String,
    /// Unix timestamp (seconds) at which the token was issued.
    pub issued_at: i64,
    /// Lifetime in seconds, counted from `issued_at`.
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl TokenRecord {
    /// Unix timestamp (seconds) at which the access token expires.
    pub fn expires_at(&self) -> i64 {
        self.issued_at
            .saturating_add(i64::try_from(self.expires_in).unwrap_or(i64::MAX))
    }

    /// Whether the token expires within `skew_secs` of now (or already has).
    pub fn expires_within(&self, skew_secs: u64) -> bool {
        self.expires_within_at(chrono::Utc::now().timestamp(), skew_secs)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    fn expires_within_at(&self, now: i64, skew_secs: u64) -> bool {
        let skew = i64::try_from(skew_secs).unwrap_or(i64::MAX);
        now.saturating_add(skew) >= self.expires_at()
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Raw fields
// ---------------------------------------------------------------------------

/// Token fields as found in a provider response, before validation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct RawTokenFields {
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "instanceUrl")]
    pub instance_url: Option<String>,
    #[serde(default, alias = "expiresIn", deserialize_with = "lenient_secs")]
    pub expires_in: Option<u64>,
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,
}

/// Accept `3600`, `3600.0` or `"3600"`. Anything else counts as absent.
fn lenient_secs<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.trim().is_empty())
}

impl RawTokenFields {
    fn has_access_token(&self) -> bool {
        present(&self.access_token).is_some()
    }

    fn has_any_token(&self) -> bool {
        self.has_access_token() || present(&self.refresh_token).is_some()
    }

    /// Validate into a [`TokenRecord`] issued now.
    ///
    /// `previous` supplies `refresh_token` and `instance_url` when the
    /// response omits them (refresh responses usually do).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IncompleteTokenData`] naming every required
    /// field that is still missing.
    pub fn into_record(self, previous: Option<&TokenRecord>) -> Result<TokenRecord> {
        let access_token = present(&self.access_token).map(str::to_string);
        let refresh_token = present(&self.refresh_token)
            .map(str::to_string)
            .or_else(|| previous.map(|p| p.refresh_token.clone()));
        let instance_url = present(&self.instance_url)
            .map(str::to_string)
            .or_else(|| previous.map(|p| p.instance_url.clone()));

        let (Some(access_token), Some(refresh_token), Some(instance_url)) =
            (access_token, refresh_token, instance_url)
        else {
            let missing: Vec<&'static str> = [
                ("access_token", present(&self.access_token).is_none()),
                (
                    "refresh_token",
                    present(&self.refresh_token).is_none() && previous.is_none(),
                ),
                (
                    "instance_url",
                    present(&self.instance_url).is_none() && previous.is_none(),
                ),
            ]
            .into_iter()
            .filter_map(|(name, is_missing)| is_missing.then_some(name))
            .collect();
            tracing::warn!(missing = ?missing, "token response is incomplete");
            return Err(AuthError::IncompleteTokenData { missing });
        };

        let expires_in = self.expires_in.unwrap_or_else(|| {
            tracing::warn!(
                default_secs = DEFAULT_EXPIRES_IN_SECS,
                "token response has no expires_in, assuming default lifetime"
            );
            DEFAULT_EXPIRES_IN_SECS
        });

        Ok(TokenRecord {
            access_token,
            refresh_token,
            instance_url,
            issued_at: chrono::Utc::now().timestamp(),
            expires_in,
            token_type: present(&self.token_type)
                .map(str::to_string)
                .unwrap_or_else(default_token_type),
        })
    }
}

// ---------------------------------------------------------------------------
// Shape matchers
// ---------------------------------------------------------------------------

type ShapeMatcher = fn(&Value) -> Option<RawTokenFields>;

/// Probed in order; the first match wins.
const SHAPE_MATCHERS: &[(&str, ShapeMatcher)] = &[("nested", match_nested), ("flat", match_flat)];

/// `{"data": {"access_token": ...}}` and friends. The inner object must
/// carry an access token.
fn match_nested(body: &Value) -> Option<RawTokenFields> {
    WRAPPER_KEYS.iter().find_map(|key| {
        let inner = body.get(key).filter(|v| v.is_object())?;
        let fields = RawTokenFields::deserialize(inner).ok()?;
        fields.has_access_token().then_some(fields)
    })
}

/// Top-level fields. Needs at least one token so that unrelated objects are
/// not mistaken for an incomplete response.
fn match_flat(body: &Value) -> Option<RawTokenFields> {
    if !body.is_object() {
        return None;
    }
    let fields = RawTokenFields::deserialize(body).ok()?;
    fields.has_any_token().then_some(fields)
}

/// Run the matchers without logging; `None` when nothing recognises `body`.
pub(crate) fn recognize(body: &Value) -> Option<(&'static str, RawTokenFields)> {
    SHAPE_MATCHERS
        .iter()
        .find_map(|(name, matcher)| matcher(body).map(|fields| (*name, fields)))
}

/// Extract token fields from a token endpoint body.
///
/// # Errors
///
/// Returns [`AuthError::UnrecognizedResponseShape`] when no matcher accepts
/// the body.
pub fn normalize(body: &Value) -> Result<RawTokenFields> {
    match recognize(body) {
        Some((shape, fields)) => {
            tracing::debug!(shape, "token response shape recognised");
            Ok(fields)
        }
        None => {
            tracing::warn!("token response matched no known shape");
            Err(AuthError::UnrecognizedResponseShape)
        }
    }
}

// ---------------------------------------------------------------------------
// OAuth error body
// ---------------------------------------------------------------------------

/// RFC 6749 §5.2 error response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default, alias = "errorDescription")]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    /// Parse `body` if it carries a non-empty string `error`.
    pub fn from_value(body: &Value) -> Option<Self> {
        let parsed = Self::deserialize(body).ok()?;
        (!parsed.error.trim().is_empty()).then_some(parsed)
    }

    pub fn description(&self) -> &str {
        self.error_description.as_deref().unwrap_or_default()
    }

    /// Whether the provider says the grant is gone for good.
    pub fn is_revocation(&self) -> bool {
        self.error == "invalid_grant"
            || self.error.to_ascii_lowercase().contains("revoked")
            || self.description().to_ascii_lowercase().contains("revoked")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
