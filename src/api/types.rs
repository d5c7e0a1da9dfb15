use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Analysis records (consumed, never owned)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn label(self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single classified comment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub comment_text: String,
    pub sentiment: Sentiment,
    pub score: f64,
}

/// A finished analysis job.
///
/// List responses omit `comments`; detail responses carry them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub post_url: String,
    pub overall_sentiment: Option<Sentiment>,
    pub overall_score: Option<f64>,
    pub positive_count: u64,
    pub neutral_count: u64,
    pub negative_count: u64,
    pub total_comments: u64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Totals across a set of analyses, as shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_analyses: u64,
    pub total_comments: u64,
    pub total_positive: u64,
    pub total_neutral: u64,
    pub total_negative: u64,
}

impl DashboardStats {
    pub fn from_analyses(analyses: &[Analysis]) -> Self {
        analyses.iter().fold(Self::default(), |acc, a| Self {
            total_analyses: acc.total_analyses + 1,
            total_comments: acc.total_comments + a.total_comments,
            total_positive: acc.total_positive + a.positive_count,
            total_neutral: acc.total_neutral + a.neutral_count,
            total_negative: acc.total_negative + a.negative_count,
        })
    }

    /// Share of positive comments in percent, `None` with no comments.
    pub fn positive_rate(&self) -> Option<f64> {
        (self.total_comments > 0)
            .then(|| self.total_positive as f64 * 100.0 / self.total_comments as f64)
    }
}

/// The backend emits naive ISO timestamps (UTC) or RFC 3339.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct RegisterData {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl fmt::Debug for RegisterData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterData")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("full_name", &self.full_name)
            .finish()
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /analyses`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisCreate {
    #[serde(rename = "facebook_post_url")]
    pub post_url: String,
}
