//! Core types for RAS
//!
//! Defines the session, ballot and vote records shared by every crate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use url::Url;
use uuid::Uuid;

use crate::error::RasError;

/// Voting session identifier (random 128-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key under which the pending record lives in the ephemeral store
    pub fn store_key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SessionId {
    type Err = RasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| RasError::Validation(format!("invalid session id: {s}")))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Reviewer (user) identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(pub i64);

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reviewer:{}", self.0)
    }
}

impl fmt::Debug for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReviewerId({})", self.0)
    }
}

/// Topic group (accord) identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccordId(pub i64);

impl fmt::Display for AccordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accord:{}", self.0)
    }
}

impl fmt::Debug for AccordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccordId({})", self.0)
    }
}

/// Timestamp in milliseconds since Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis() as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A reviewer's decision on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Rejected,
    Abstained,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Rejected => "rejected",
            Decision::Abstained => "abstained",
        }
    }
}

impl FromStr for Decision {
    type Err = RasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allowed" => Ok(Decision::Allowed),
            "rejected" => Ok(Decision::Rejected),
            "abstained" => Ok(Decision::Abstained),
            other => Err(RasError::Validation(format!("unknown vote state: {other}"))),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a voting session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Allowed,
    Rejected,
    Abstained,
    Voided,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Allowed => "allowed",
            SessionState::Rejected => "rejected",
            SessionState::Abstained => "abstained",
            SessionState::Voided => "voided",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::New)
    }

    /// Only `New` may move, and only to a terminal state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        *self == SessionState::New && next.is_terminal()
    }
}

impl From<Decision> for SessionState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed => SessionState::Allowed,
            Decision::Rejected => SessionState::Rejected,
            Decision::Abstained => SessionState::Abstained,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable voting session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingSession {
    pub id: SessionId,
    pub subject: String,
    pub post_uri: String,
    pub redirect_uri: String,
    pub accord: AccordId,
    pub state: SessionState,
    pub created_at: Timestamp,
}

impl VotingSession {
    pub fn new(request: &NewSession) -> Self {
        Self {
            id: SessionId::new(),
            subject: request.subject.clone(),
            post_uri: request.post_uri.clone(),
            redirect_uri: request.redirect_uri.clone(),
            accord: request.accord,
            state: SessionState::New,
            created_at: Timestamp::now(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            ras_id: self.id,
            subject: self.subject.clone(),
            post_uri: self.post_uri.clone(),
        }
    }
}

/// Request to open a new voting session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub subject: String,
    pub post_uri: String,
    pub redirect_uri: String,
    pub accord: AccordId,
}

/// Longest accepted subject, in bytes
pub const MAX_SUBJECT_LEN: usize = 1024;

/// Longest accepted post or callback URI, in bytes
pub const MAX_URI_LEN: usize = 2048;

/// Longest accepted ballot note, in bytes
pub const MAX_NOTE_LEN: usize = 1024;

impl NewSession {
    /// Reject blank or oversized fields and URIs that are not absolute http(s) URLs.
    ///
    /// The bounds keep one session summary well inside a store segment, since
    /// every panelist's index carries a copy of it.
    pub fn validate(&self) -> Result<(), RasError> {
        if self.subject.trim().is_empty() {
            return Err(RasError::Validation("subject is empty".into()));
        }
        check_len("subject", &self.subject, MAX_SUBJECT_LEN)?;
        validate_uri("postUri", &self.post_uri)?;
        validate_uri("redirectUri", &self.redirect_uri)?;
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), RasError> {
    if value.len() > max {
        return Err(RasError::Validation(format!(
            "{field} is {} bytes, limit is {max}",
            value.len()
        )));
    }
    Ok(())
}

fn validate_uri(field: &str, value: &str) -> Result<(), RasError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RasError::Validation(format!("{field} is empty")));
    }
    check_len(field, value, MAX_URI_LEN)?;

    let url = Url::parse(value)
        .map_err(|e| RasError::Validation(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RasError::Validation(format!("{field} must be an http(s) URL")));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RasError::Validation(format!("{field} has no host")));
    }
    Ok(())
}

/// One panelist's slot in the pending record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSlot {
    pub user_id: ReviewerId,
    /// `None` until the reviewer votes
    pub state: Option<Decision>,
    #[serde(default)]
    pub note: String,
}

impl VoteSlot {
    pub fn unset(user_id: ReviewerId) -> Self {
        Self {
            user_id,
            state: None,
            note: String::new(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.is_some()
    }
}

/// Denormalized session entry kept in a reviewer's index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub ras_id: SessionId,
    pub subject: String,
    pub post_uri: String,
}

/// Durable per-panelist vote, written once at finalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalVoteRecord {
    pub ras_id: SessionId,
    pub voter: ReviewerId,
    pub state: Decision,
    pub note: String,
    pub created_at: Timestamp,
}

/// A submitted vote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub ras_id: SessionId,
    pub state: Decision,
    #[serde(default)]
    pub note: String,
}

impl Ballot {
    pub fn validate(&self) -> Result<(), RasError> {
        check_len("note", &self.note, MAX_NOTE_LEN)
    }
}

/// Final decision delivered to the session's callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub ras_id: SessionId,
    pub state: SessionState,
    pub subject: String,
    pub redirect_uri: String,
}

/// Topic group a session belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accord {
    pub id: AccordId,
    pub name: String,
    #[serde(default)]
    pub about: String,
}

/// Eligible reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub id: ReviewerId,
    pub email: String,
    pub created_at: Timestamp,
}

impl Reviewer {
    pub fn new(id: ReviewerId, email: &str) -> Result<Self, RasError> {
        if !is_valid_email(email) {
            return Err(RasError::Validation(format!("invalid email: {email}")));
        }
        Ok(Self {
            id,
            email: email.to_string(),
            created_at: Timestamp::now(),
        })
    }
}

/// Loose address check: `local@domain.tld`
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| {
        Regex::new(r"^\w+([-+.]\w+)*@\w+([-.]\w+)*\.\w+([-.]\w+)*$")
            .expect("static email pattern")
    });
    re.is_match(email)
}
