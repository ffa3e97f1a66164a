//! # Job Application Domain Model
//!
//! Data types for the application tracking pipeline: applications, notes,
//! and follow-up reminders. An `Application` is the aggregate root — notes
//! and follow-ups belong to exactly one application and are stored inside it,
//! which keeps per-user isolation a property of the containing record.
//!
//! ## Deduplication Key:
//! `(user_id, normalized company, normalized role title)`. Normalization is
//! case-folding plus whitespace cleanup (see [`normalize`]) and must be
//! idempotent so the key is stable no matter how often it is recomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage of an application in the hiring pipeline.
///
/// The set is an unordered enum: real hiring flows are non-linear (a
/// rejection can be reopened, an onsite can fall back to another screen), so
/// any stage may transition to any other. `UpdateStatus` records the new
/// value and timestamp without validating the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStage {
    Draft,
    Applied,
    HrScreen,
    TechScreen,
    Onsite,
    Offer,
    Rejected,
    Withdrawn,
}

impl StatusStage {
    /// All stages, in pipeline-report order.
    pub const ALL: [StatusStage; 8] = [
        StatusStage::Draft,
        StatusStage::Applied,
        StatusStage::HrScreen,
        StatusStage::TechScreen,
        StatusStage::Onsite,
        StatusStage::Offer,
        StatusStage::Rejected,
        StatusStage::Withdrawn,
    ];

    /// Stages that count as "active" in pipeline summaries.
    pub const ACTIVE: [StatusStage; 4] = [
        StatusStage::Applied,
        StatusStage::HrScreen,
        StatusStage::TechScreen,
        StatusStage::Onsite,
    ];

    /// Convert stage to its wire string (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusStage::Draft => "draft",
            StatusStage::Applied => "applied",
            StatusStage::HrScreen => "hr_screen",
            StatusStage::TechScreen => "tech_screen",
            StatusStage::Onsite => "onsite",
            StatusStage::Offer => "offer",
            StatusStage::Rejected => "rejected",
            StatusStage::Withdrawn => "withdrawn",
        }
    }

    /// Parse a stage from its wire string.
    pub fn parse(value: &str) -> Option<StatusStage> {
        StatusStage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == value)
    }
}

/// Channel through which a follow-up should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupChannel {
    Email,
    Call,
    Linkedin,
    Other,
}

impl FollowupChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupChannel::Email => "email",
            FollowupChannel::Call => "call",
            FollowupChannel::Linkedin => "linkedin",
            FollowupChannel::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<FollowupChannel> {
        match value {
            "email" => Some(FollowupChannel::Email),
            "call" => Some(FollowupChannel::Call),
            "linkedin" => Some(FollowupChannel::Linkedin),
            "other" => Some(FollowupChannel::Other),
            _ => None,
        }
    }
}

/// Lifecycle of a follow-up reminder.
///
/// Mutated only by explicit transitions (complete/cancel) or rescheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Pending,
    Completed,
    Cancelled,
}

impl FollowupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::Completed => "completed",
            FollowupStatus::Cancelled => "cancelled",
        }
    }
}

/// A free-text note attached to an application.
///
/// Immutable once created: there is no update or delete operation, only
/// append and read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A follow-up reminder attached to an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followup {
    pub id: Uuid,
    pub due_at: DateTime<Utc>,
    pub channel: FollowupChannel,
    pub status: FollowupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One job-application record.
///
/// ## Normalized Fields:
/// `company_norm` and `role_title_norm` are derived from their raw
/// counterparts with [`normalize`] at write time and never exposed to the
/// agent — they exist only so the dedup key survives spoken-input variance
/// ("Google", " google ", "GOOGLE").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub user_id: String,
    pub company: String,
    pub company_norm: String,
    pub role_title: String,
    pub role_title_norm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_post_url: Option<String>,
    pub status_stage: StatusStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ok: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skills_required: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_posted_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<Note>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub followups: Vec<Followup>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming fields for a create-or-merge call.
///
/// Every field except company and role title is optional: on merge, only
/// supplied (`Some`) fields are written into the existing record, so absent
/// input can never blank out data captured in an earlier utterance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationDraft {
    pub company: String,
    pub role_title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub job_post_url: Option<String>,
    #[serde(default)]
    pub status_stage: Option<StatusStage>,
    #[serde(default)]
    pub salary_min: Option<f64>,
    #[serde(default)]
    pub salary_max: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub remote_ok: Option<bool>,
    #[serde(default)]
    pub skills_required: Option<Vec<String>>,
    #[serde(default)]
    pub job_posted_date: Option<DateTime<Utc>>,
}

/// How a tool call points at an existing application.
///
/// Either an explicit id, or a spoken hint ("the Microsoft application")
/// matched fuzzily against company and role title.
#[derive(Debug, Clone)]
pub enum ApplicationRef {
    Id(Uuid),
    Hint(String),
}

impl ApplicationRef {
    /// Interpret a raw reference string: a parseable UUID is an id lookup,
    /// anything else is a fuzzy hint.
    pub fn from_raw(raw: &str) -> ApplicationRef {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => ApplicationRef::Id(id),
            Err(_) => ApplicationRef::Hint(raw.trim().to_string()),
        }
    }
}

/// Normalize a company or role title for dedup-key comparison.
///
/// Case-folds, trims, and collapses internal whitespace runs to a single
/// space. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_and_whitespace() {
        assert_eq!(normalize("Google"), "google");
        assert_eq!(normalize("  google  "), "google");
        assert_eq!(normalize("GOOGLE"), "google");
        assert_eq!(normalize("Software   Engineer"), "software engineer");
        assert_eq!(normalize("\tStaff\n Engineer "), "staff engineer");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = ["Google", "  Deep  Mind ", "ACME Corp.", "ümlaut GmbH"];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_status_stage_round_trip() {
        for stage in StatusStage::ALL {
            assert_eq!(StatusStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(StatusStage::parse("ghosted"), None);
    }

    #[test]
    fn test_status_stage_serde_matches_as_str() {
        for stage in StatusStage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
    }

    #[test]
    fn test_application_ref_from_raw() {
        let id = Uuid::new_v4();
        match ApplicationRef::from_raw(&id.to_string()) {
            ApplicationRef::Id(parsed) => assert_eq!(parsed, id),
            ApplicationRef::Hint(_) => panic!("UUID should resolve to an id reference"),
        }
        match ApplicationRef::from_raw("  Microsoft ") {
            ApplicationRef::Hint(hint) => assert_eq!(hint, "Microsoft"),
            ApplicationRef::Id(_) => panic!("plain text should resolve to a hint"),
        }
    }
}
