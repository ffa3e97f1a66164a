//! # Application State Engine
//!
//! In-process store for the job-application pipeline. All agent tool calls
//! land here, so this module owns the invariants the rest of the system
//! relies on:
//!
//! - **Deduplication**: for one user, no two applications may share the same
//!   normalized `(company, role title)` with creation timestamps inside a
//!   14-day window. The check-then-write runs under a single write lock, so
//!   two concurrent sessions can never both observe "not found".
//! - **Merge over overwrite**: a repeated create supplies only the fields the
//!   user spoke; absent fields never blank out stored values.
//! - **Tenant isolation**: every operation is keyed by user id, and records
//!   are stored per user, so cross-user leakage is structurally impossible.
//!
//! ## Thread Safety:
//! One `RwLock` guards the whole store. Reads (search, summary) take the
//! shared lock; every mutation takes the exclusive lock for its full
//! find-then-write sequence. Mutation frequency is voice-paced, so a finer
//! locking scheme buys nothing here.

use crate::error::{AppError, AppResult};
use crate::store::models::{
    normalize, Application, ApplicationDraft, ApplicationRef, Followup, FollowupChannel,
    FollowupStatus, Note, StatusStage,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Rolling window within which a repeated (company, role) create is treated
/// as the same logical application.
pub const DEDUP_WINDOW_DAYS: i64 = 14;

/// Maximum number of records returned by one search call.
pub const SEARCH_RESULT_CAP: usize = 50;

/// Result of a create-or-merge call.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub application_id: Uuid,
    pub updated: bool,
    pub company: String,
    pub role_title: String,
}

/// Result of a status update.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub application_id: Uuid,
    pub company: String,
    pub role_title: String,
    pub status_stage: StatusStage,
}

/// Result of appending a note.
#[derive(Debug, Clone, Serialize)]
pub struct NoteAdded {
    pub application_id: Uuid,
    pub note_id: Uuid,
    pub company: String,
    pub role_title: String,
}

/// Result of scheduling a follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct FollowupScheduled {
    pub application_id: Uuid,
    pub followup_id: Uuid,
    pub company: String,
    pub role_title: String,
    pub due_at: DateTime<Utc>,
}

/// A pending follow-up that has come due, with enough application context
/// for the agent to phrase a reminder.
#[derive(Debug, Clone, Serialize)]
pub struct DueFollowup {
    pub application_id: Uuid,
    pub company: String,
    pub role_title: String,
    pub followup: Followup,
}

/// Which timestamp a search time range applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    CreatedAt,
    UpdatedAt,
}

/// Named calendar ranges the agent can pass instead of explicit bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedRange {
    LastWeek,
    ThisWeek,
    LastMonth,
    ThisMonth,
}

impl NamedRange {
    pub fn parse(value: &str) -> Option<NamedRange> {
        match value {
            "last_week" => Some(NamedRange::LastWeek),
            "this_week" => Some(NamedRange::ThisWeek),
            "last_month" => Some(NamedRange::LastMonth),
            "this_month" => Some(NamedRange::ThisMonth),
            _ => None,
        }
    }

    /// Resolve to `[start, end)` calendar boundaries relative to `now`.
    ///
    /// Weeks run Monday through Sunday; months are calendar months.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive();
        let week_start =
            today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let (start, end) = match self {
            NamedRange::ThisWeek => (week_start, week_start + Duration::days(7)),
            NamedRange::LastWeek => (week_start - Duration::days(7), week_start),
            NamedRange::ThisMonth => {
                let start = first_of_month(today);
                (start, first_of_next_month(start))
            }
            NamedRange::LastMonth => {
                let end = first_of_month(today);
                (first_of_prev_month(end), end)
            }
        };
        (midnight(start), midnight(end))
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap()
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1).unwrap()
    }
}

fn first_of_prev_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 1 {
        NaiveDate::from_ymd_opt(date.year() - 1, 12, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() - 1, 1).unwrap()
    }
}

/// Search criteria. All present filters are AND-combined; the stage list is
/// OR-combined internally. An empty filter set matches everything the user
/// owns.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Which timestamp the time range applies to (defaults to `created_at`).
    pub time_field: Option<TimeField>,
    /// Named calendar range; takes precedence over explicit bounds.
    pub named_range: Option<NamedRange>,
    /// Explicit range start (inclusive).
    pub from: Option<DateTime<Utc>>,
    /// Explicit range end (exclusive).
    pub to: Option<DateTime<Utc>>,
    /// Match any of these stages.
    pub stages: Vec<StatusStage>,
    /// Match this company (compared on the normalized form).
    pub company: Option<String>,
    /// Case-insensitive substring match on location.
    pub location: Option<String>,
    /// Match the remote flag.
    pub remote_ok: Option<bool>,
}

impl SearchFilters {
    fn time_bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.named_range {
            Some(range) => {
                let (start, end) = range.bounds(now);
                (Some(start), Some(end))
            }
            None => (self.from, self.to),
        }
    }

    fn matches(&self, app: &Application, now: DateTime<Utc>) -> bool {
        let timestamp = match self.time_field.unwrap_or(TimeField::CreatedAt) {
            TimeField::CreatedAt => app.created_at,
            TimeField::UpdatedAt => app.updated_at,
        };
        let (from, to) = self.time_bounds(now);
        if let Some(from) = from {
            if timestamp < from {
                return false;
            }
        }
        if let Some(to) = to {
            if timestamp >= to {
                return false;
            }
        }
        if !self.stages.is_empty() && !self.stages.contains(&app.status_stage) {
            return false;
        }
        if let Some(company) = &self.company {
            if app.company_norm != normalize(company) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            let haystack = match &app.location {
                Some(loc) => loc.to_lowercase(),
                None => return false,
            };
            if !haystack.contains(&location.to_lowercase()) {
                return false;
            }
        }
        if let Some(remote_ok) = self.remote_ok {
            if app.remote_ok != Some(remote_ok) {
                return false;
            }
        }
        true
    }
}

/// Per-stage counts and derived pipeline statistics for one user.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub total: usize,
    pub status_breakdown: BTreeMap<&'static str, usize>,
    pub active_applications: usize,
    pub offers: usize,
    /// `offers / (offers + rejected + withdrawn)`, 0 when no application has
    /// reached a terminal stage yet.
    pub success_rate: f64,
}

/// The application store. One instance per process, shared by all sessions.
pub struct ApplicationStore {
    /// Records grouped by owning user id.
    records: RwLock<HashMap<String, Vec<Application>>>,
}

impl Default for ApplicationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new application or merge into a recent duplicate.
    ///
    /// ## Dedup Rule:
    /// An existing record for the same user whose normalized (company, role)
    /// matches and whose `created_at` lies within the last 14 days is the
    /// same logical application. Supplied fields are merged into it and
    /// `updated: true` is returned; otherwise a fresh record starts in
    /// `draft` and `updated: false` is returned.
    ///
    /// The lookup and the write happen under one exclusive lock — this is
    /// what upholds the dedup invariant when two sessions race on the same
    /// key.
    pub fn upsert_application(
        &self,
        user_id: &str,
        draft: ApplicationDraft,
    ) -> AppResult<UpsertOutcome> {
        let company_norm = normalize(&draft.company);
        let role_norm = normalize(&draft.role_title);
        if company_norm.is_empty() {
            return Err(AppError::ValidationError("company must not be empty".to_string()));
        }
        if role_norm.is_empty() {
            return Err(AppError::ValidationError(
                "role title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let window_start = now - Duration::days(DEDUP_WINDOW_DAYS);
        let mut records = self.records.write().unwrap();
        let apps = records.entry(user_id.to_string()).or_default();

        if let Some(existing) = apps.iter_mut().find(|app| {
            app.company_norm == company_norm
                && app.role_title_norm == role_norm
                && app.created_at >= window_start
        }) {
            merge_draft(existing, &draft, now);
            debug!(
                user_id = %user_id,
                application_id = %existing.id,
                company = %existing.company_norm,
                "merged into existing application"
            );
            return Ok(UpsertOutcome {
                application_id: existing.id,
                updated: true,
                company: existing.company.clone(),
                role_title: existing.role_title.clone(),
            });
        }

        let app = Application {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            company: draft.company.trim().to_string(),
            company_norm,
            role_title: draft.role_title.trim().to_string(),
            role_title_norm: role_norm,
            location: draft.location,
            source: draft.source,
            job_post_url: draft.job_post_url,
            status_stage: draft.status_stage.unwrap_or(StatusStage::Draft),
            salary_min: draft.salary_min,
            salary_max: draft.salary_max,
            currency: draft.currency,
            remote_ok: draft.remote_ok,
            skills_required: draft.skills_required.unwrap_or_default(),
            job_posted_date: draft.job_posted_date,
            notes: Vec::new(),
            followups: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let outcome = UpsertOutcome {
            application_id: app.id,
            updated: false,
            company: app.company.clone(),
            role_title: app.role_title.clone(),
        };
        debug!(
            user_id = %user_id,
            application_id = %app.id,
            company = %app.company_norm,
            "created application"
        );
        apps.push(app);
        Ok(outcome)
    }

    /// Record a new pipeline stage for an application.
    ///
    /// Stages are an unordered set — any stage may move to any other, so no
    /// transition validation happens here, only the write and timestamp.
    pub fn update_status(
        &self,
        user_id: &str,
        app_ref: &ApplicationRef,
        stage: StatusStage,
    ) -> AppResult<StatusChange> {
        let mut records = self.records.write().unwrap();
        let app = resolve_mut(records.get_mut(user_id), app_ref)?;
        app.status_stage = stage;
        app.updated_at = Utc::now();
        Ok(StatusChange {
            application_id: app.id,
            company: app.company.clone(),
            role_title: app.role_title.clone(),
            status_stage: stage,
        })
    }

    /// Append an immutable note to an application.
    pub fn add_note(
        &self,
        user_id: &str,
        app_ref: &ApplicationRef,
        content: &str,
    ) -> AppResult<NoteAdded> {
        if content.trim().is_empty() {
            return Err(AppError::ValidationError("note content must not be empty".to_string()));
        }
        let mut records = self.records.write().unwrap();
        let app = resolve_mut(records.get_mut(user_id), app_ref)?;
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            content: content.trim().to_string(),
            created_at: now,
        };
        let note_id = note.id;
        app.notes.push(note);
        app.updated_at = now;
        Ok(NoteAdded {
            application_id: app.id,
            note_id,
            company: app.company.clone(),
            role_title: app.role_title.clone(),
        })
    }

    /// List an application's notes, newest first.
    pub fn notes(&self, user_id: &str, app_ref: &ApplicationRef) -> AppResult<Vec<Note>> {
        let records = self.records.read().unwrap();
        let app = resolve(records.get(user_id), app_ref)?;
        let mut notes = app.notes.clone();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    /// Create a pending follow-up reminder on an application.
    ///
    /// `due_at` must already be an absolute timestamp — relative phrases like
    /// "next Friday" are resolved by the caller before this boundary. A
    /// timestamp in the past is accepted (a user may record a follow-up they
    /// already missed) but logged.
    pub fn schedule_followup(
        &self,
        user_id: &str,
        app_ref: &ApplicationRef,
        due_at: DateTime<Utc>,
        channel: FollowupChannel,
        note: Option<String>,
    ) -> AppResult<FollowupScheduled> {
        let mut records = self.records.write().unwrap();
        let app = resolve_mut(records.get_mut(user_id), app_ref)?;
        let now = Utc::now();
        if due_at < now {
            warn!(
                user_id = %user_id,
                application_id = %app.id,
                due_at = %due_at,
                "follow-up scheduled in the past"
            );
        }
        let followup = Followup {
            id: Uuid::new_v4(),
            due_at,
            channel,
            status: FollowupStatus::Pending,
            note,
            created_at: now,
            updated_at: now,
        };
        let followup_id = followup.id;
        app.followups.push(followup);
        app.updated_at = now;
        Ok(FollowupScheduled {
            application_id: app.id,
            followup_id,
            company: app.company.clone(),
            role_title: app.role_title.clone(),
            due_at,
        })
    }

    /// Mark a follow-up completed.
    pub fn complete_followup(&self, user_id: &str, followup_id: Uuid) -> AppResult<()> {
        self.transition_followup(user_id, followup_id, FollowupStatus::Completed)
    }

    /// Cancel a follow-up.
    pub fn cancel_followup(&self, user_id: &str, followup_id: Uuid) -> AppResult<()> {
        self.transition_followup(user_id, followup_id, FollowupStatus::Cancelled)
    }

    fn transition_followup(
        &self,
        user_id: &str,
        followup_id: Uuid,
        status: FollowupStatus,
    ) -> AppResult<()> {
        let mut records = self.records.write().unwrap();
        let followup = find_followup_mut(records.get_mut(user_id), followup_id)?;
        followup.status = status;
        followup.updated_at = Utc::now();
        Ok(())
    }

    /// Move a follow-up to a new due timestamp. The reminder goes back to
    /// `pending` — rescheduling a cancelled follow-up revives it.
    pub fn reschedule_followup(
        &self,
        user_id: &str,
        followup_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut records = self.records.write().unwrap();
        let followup = find_followup_mut(records.get_mut(user_id), followup_id)?;
        followup.due_at = due_at;
        followup.status = FollowupStatus::Pending;
        followup.updated_at = Utc::now();
        Ok(())
    }

    /// All pending follow-ups due at or before now, soonest first.
    pub fn due_followups(&self, user_id: &str) -> Vec<DueFollowup> {
        let now = Utc::now();
        let records = self.records.read().unwrap();
        let mut due: Vec<DueFollowup> = records
            .get(user_id)
            .map(|apps| {
                apps.iter()
                    .flat_map(|app| {
                        app.followups
                            .iter()
                            .filter(move |f| f.status == FollowupStatus::Pending && f.due_at <= now)
                            .map(move |f| DueFollowup {
                                application_id: app.id,
                                company: app.company.clone(),
                                role_title: app.role_title.clone(),
                                followup: f.clone(),
                            })
                    })
                    .collect()
            })
            .unwrap_or_default();
        due.sort_by(|a, b| a.followup.due_at.cmp(&b.followup.due_at));
        due
    }

    /// Search the user's applications.
    ///
    /// Filters are AND-combined (see [`SearchFilters`]); results come back in
    /// `updated_at`-descending order, capped at [`SEARCH_RESULT_CAP`].
    pub fn search(&self, user_id: &str, filters: &SearchFilters) -> AppResult<Vec<Application>> {
        if let (Some(from), Some(to)) = (filters.from, filters.to) {
            if from > to {
                return Err(AppError::ValidationError(
                    "time range start is after its end".to_string(),
                ));
            }
        }
        let now = Utc::now();
        let records = self.records.read().unwrap();
        let mut hits: Vec<Application> = records
            .get(user_id)
            .map(|apps| {
                apps.iter()
                    .filter(|app| filters.matches(app, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if hits.len() > SEARCH_RESULT_CAP {
            debug!(
                user_id = %user_id,
                matched = hits.len(),
                cap = SEARCH_RESULT_CAP,
                "search results truncated"
            );
            hits.truncate(SEARCH_RESULT_CAP);
        }
        Ok(hits)
    }

    /// Per-stage counts and derived statistics for the user's pipeline.
    pub fn summarize(&self, user_id: &str) -> PipelineSummary {
        let records = self.records.read().unwrap();
        let apps: &[Application] = records.get(user_id).map(Vec::as_slice).unwrap_or(&[]);

        let mut breakdown: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut counts: HashMap<StatusStage, usize> = HashMap::new();
        for app in apps {
            *counts.entry(app.status_stage).or_insert(0) += 1;
        }
        for stage in StatusStage::ALL {
            if let Some(&count) = counts.get(&stage) {
                breakdown.insert(stage.as_str(), count);
            }
        }

        let stage_count = |stage: StatusStage| counts.get(&stage).copied().unwrap_or(0);
        let active = StatusStage::ACTIVE.iter().map(|s| stage_count(*s)).sum();
        let offers = stage_count(StatusStage::Offer);
        let closed = offers + stage_count(StatusStage::Rejected) + stage_count(StatusStage::Withdrawn);
        let success_rate = if closed > 0 {
            offers as f64 / closed as f64
        } else {
            0.0
        };

        PipelineSummary {
            total: apps.len(),
            status_breakdown: breakdown,
            active_applications: active,
            offers,
            success_rate,
        }
    }

    /// Total record count across all users (health/metrics reporting).
    pub fn application_count(&self) -> usize {
        self.records.read().unwrap().values().map(Vec::len).sum()
    }
}

/// Merge supplied draft fields into an existing record. `None` fields leave
/// the stored value untouched; the skills list unions rather than replaces.
fn merge_draft(app: &mut Application, draft: &ApplicationDraft, now: DateTime<Utc>) {
    if let Some(location) = &draft.location {
        app.location = Some(location.clone());
    }
    if let Some(source) = &draft.source {
        app.source = Some(source.clone());
    }
    if let Some(url) = &draft.job_post_url {
        app.job_post_url = Some(url.clone());
    }
    if let Some(stage) = draft.status_stage {
        app.status_stage = stage;
    }
    if let Some(salary_min) = draft.salary_min {
        app.salary_min = Some(salary_min);
    }
    if let Some(salary_max) = draft.salary_max {
        app.salary_max = Some(salary_max);
    }
    if let Some(currency) = &draft.currency {
        app.currency = Some(currency.clone());
    }
    if let Some(remote_ok) = draft.remote_ok {
        app.remote_ok = Some(remote_ok);
    }
    if let Some(skills) = &draft.skills_required {
        for skill in skills {
            if !app.skills_required.iter().any(|s| normalize(s) == normalize(skill)) {
                app.skills_required.push(skill.clone());
            }
        }
    }
    if let Some(posted) = draft.job_posted_date {
        app.job_posted_date = Some(posted);
    }
    app.updated_at = now;
}

/// Resolve a reference against one user's records, immutably.
fn resolve<'a>(
    apps: Option<&'a Vec<Application>>,
    app_ref: &ApplicationRef,
) -> AppResult<&'a Application> {
    let apps = apps.map(Vec::as_slice).unwrap_or(&[]);
    resolve_index(apps, app_ref)
        .map(|idx| &apps[idx])
        .ok_or_else(|| not_found(app_ref))
}

/// Resolve a reference against one user's records, mutably.
fn resolve_mut<'a>(
    apps: Option<&'a mut Vec<Application>>,
    app_ref: &ApplicationRef,
) -> AppResult<&'a mut Application> {
    let apps = apps.ok_or_else(|| not_found(app_ref))?;
    let idx = resolve_index(apps, app_ref).ok_or_else(|| not_found(app_ref))?;
    Ok(&mut apps[idx])
}

/// Find the record a reference points at.
///
/// An id reference matches exactly. A hint matches case-insensitively as a
/// substring of company or role title; among several matches the most
/// recently touched record (highest `updated_at`) wins, so "the Microsoft
/// application" means the one the user last worked with.
fn resolve_index(apps: &[Application], app_ref: &ApplicationRef) -> Option<usize> {
    match app_ref {
        ApplicationRef::Id(id) => apps.iter().position(|app| app.id == *id),
        ApplicationRef::Hint(hint) => {
            let needle = hint.to_lowercase();
            if needle.is_empty() {
                return None;
            }
            apps.iter()
                .enumerate()
                .filter(|(_, app)| {
                    app.company.to_lowercase().contains(&needle)
                        || app.role_title.to_lowercase().contains(&needle)
                })
                .max_by_key(|(_, app)| app.updated_at)
                .map(|(idx, _)| idx)
        }
    }
}

fn find_followup_mut(
    apps: Option<&mut Vec<Application>>,
    followup_id: Uuid,
) -> AppResult<&mut Followup> {
    apps.and_then(|apps| {
        apps.iter_mut()
            .flat_map(|app| app.followups.iter_mut())
            .find(|f| f.id == followup_id)
    })
    .ok_or_else(|| {
        AppError::ApplicationNotFound(format!("no follow-up with id '{}'", followup_id))
    })
}

fn not_found(app_ref: &ApplicationRef) -> AppError {
    match app_ref {
        ApplicationRef::Id(id) => {
            AppError::ApplicationNotFound(format!("no application with id '{}'", id))
        }
        ApplicationRef::Hint(hint) => {
            AppError::ApplicationNotFound(format!("no application found for '{}'", hint))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(company: &str, role: &str) -> ApplicationDraft {
        ApplicationDraft {
            company: company.to_string(),
            role_title: role.to_string(),
            ..ApplicationDraft::default()
        }
    }

    fn hint(text: &str) -> ApplicationRef {
        ApplicationRef::Hint(text.to_string())
    }

    /// Push a stored record's creation timestamp into the past, simulating
    /// an application created `days` ago.
    fn age_application(store: &ApplicationStore, user: &str, id: Uuid, days: i64) {
        let mut records = store.records.write().unwrap();
        let app = records
            .get_mut(user)
            .unwrap()
            .iter_mut()
            .find(|a| a.id == id)
            .unwrap();
        app.created_at = app.created_at - Duration::days(days);
        app.updated_at = app.updated_at - Duration::days(days);
    }

    #[test]
    fn test_upsert_creates_draft_application() {
        let store = ApplicationStore::new();
        let outcome = store.upsert_application("user-a", draft("Google", "Software Engineer")).unwrap();
        assert!(!outcome.updated);

        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].status_stage, StatusStage::Draft);
        assert_eq!(apps[0].company_norm, "google");
        assert_eq!(apps[0].role_title_norm, "software engineer");
    }

    #[test]
    fn test_upsert_rejects_blank_company() {
        let store = ApplicationStore::new();
        let err = store.upsert_application("user-a", draft("   ", "Engineer")).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_dedup_never_produces_two_records_within_window() {
        let store = ApplicationStore::new();
        let first = store.upsert_application("user-a", draft("Google", "Software Engineer")).unwrap();

        // N variants of the same key with creation timestamps jittered
        // across the window must all merge into the single record.
        let variants = [
            ("google", "software engineer", 0),
            (" Google ", "Software  Engineer", 3),
            ("GOOGLE", "SOFTWARE ENGINEER", 7),
            ("gOOgle", " software engineer ", 13),
        ];
        for (company, role, age_days) in variants {
            age_application(&store, "user-a", first.application_id, age_days);
            let outcome = store.upsert_application("user-a", draft(company, role)).unwrap();
            assert!(outcome.updated, "variant {:?} should merge", company);
            assert_eq!(outcome.application_id, first.application_id);
            // restore the original age for the next iteration
            age_application(&store, "user-a", first.application_id, -age_days);
        }

        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps.len(), 1);
    }

    #[test]
    fn test_dedup_window_expires_after_fourteen_days() {
        let store = ApplicationStore::new();
        let first = store.upsert_application("user-a", draft("Google", "Software Engineer")).unwrap();
        age_application(&store, "user-a", first.application_id, 15);

        let second = store.upsert_application("user-a", draft("Google", "Software Engineer")).unwrap();
        assert!(!second.updated);
        assert_ne!(second.application_id, first.application_id);
        assert_eq!(store.search("user-a", &SearchFilters::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_merge_fills_new_fields_and_preserves_existing() {
        let store = ApplicationStore::new();
        let mut initial = draft("Google", "Software Engineer");
        initial.location = Some("Mountain View, CA".to_string());
        let first = store.upsert_application("user-a", initial).unwrap();
        age_application(&store, "user-a", first.application_id, 3);

        // Day-3 repeat adds a salary range but says nothing about location.
        let mut repeat = draft("google", "software engineer");
        repeat.salary_min = Some(150_000.0);
        repeat.salary_max = Some(190_000.0);
        let second = store.upsert_application("user-a", repeat).unwrap();
        assert!(second.updated);
        assert_eq!(second.application_id, first.application_id);

        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps.len(), 1);
        let app = &apps[0];
        assert_eq!(app.salary_min, Some(150_000.0));
        assert_eq!(app.salary_max, Some(190_000.0));
        assert_eq!(app.location.as_deref(), Some("Mountain View, CA"));
        assert_eq!(app.company, "Google");
        assert_eq!(app.role_title, "Software Engineer");
    }

    #[test]
    fn test_merge_unions_skills() {
        let store = ApplicationStore::new();
        let mut initial = draft("Acme", "Backend Engineer");
        initial.skills_required = Some(vec!["Rust".to_string(), "Postgres".to_string()]);
        store.upsert_application("user-a", initial).unwrap();

        let mut repeat = draft("acme", "backend engineer");
        repeat.skills_required = Some(vec!["rust".to_string(), "Kubernetes".to_string()]);
        store.upsert_application("user-a", repeat).unwrap();

        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps[0].skills_required, vec!["Rust", "Postgres", "Kubernetes"]);
    }

    #[test]
    fn test_update_status_missing_reference_creates_nothing() {
        let store = ApplicationStore::new();
        let err = store
            .update_status("user-a", &hint("Microsoft"), StatusStage::Applied)
            .unwrap_err();
        assert!(matches!(err, AppError::ApplicationNotFound(_)));
        assert_eq!(store.application_count(), 0);
    }

    #[test]
    fn test_update_status_records_any_transition() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Stripe", "Platform Engineer")).unwrap();

        // Non-linear flow: rejected and back again is legal.
        for stage in [StatusStage::Rejected, StatusStage::Applied, StatusStage::Offer] {
            let change = store.update_status("user-a", &hint("stripe"), stage).unwrap();
            assert_eq!(change.status_stage, stage);
        }
    }

    #[test]
    fn test_fuzzy_reference_prefers_most_recently_updated() {
        let store = ApplicationStore::new();
        let older = store.upsert_application("user-a", draft("Microsoft", "SDE II")).unwrap();
        let newer = store.upsert_application("user-a", draft("Microsoft Research", "Scientist")).unwrap();
        age_application(&store, "user-a", older.application_id, 2);

        let change = store.update_status("user-a", &hint("microsoft"), StatusStage::Applied).unwrap();
        assert_eq!(change.application_id, newer.application_id);

        // Touching the older one flips which record the hint resolves to.
        store
            .update_status("user-a", &ApplicationRef::Id(older.application_id), StatusStage::Onsite)
            .unwrap();
        let note = store.add_note("user-a", &hint("microsoft"), "sent thank-you email").unwrap();
        assert_eq!(note.application_id, older.application_id);
    }

    #[test]
    fn test_reference_by_role_title() {
        let store = ApplicationStore::new();
        let created = store.upsert_application("user-a", draft("Anthill", "Data Engineer")).unwrap();
        let change = store
            .update_status("user-a", &hint("data engineer"), StatusStage::HrScreen)
            .unwrap();
        assert_eq!(change.application_id, created.application_id);
    }

    #[test]
    fn test_add_note_rejects_empty_content() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Acme", "Engineer")).unwrap();
        let err = store.add_note("user-a", &hint("acme"), "   ").unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_notes_newest_first() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Acme", "Engineer")).unwrap();
        store.add_note("user-a", &hint("acme"), "first").unwrap();
        store.add_note("user-a", &hint("acme"), "second").unwrap();

        let notes = store.notes("user-a", &hint("acme")).unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].created_at >= notes[1].created_at);
        assert_eq!(notes[0].content, "second");
    }

    #[test]
    fn test_followup_lifecycle() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Acme", "Engineer")).unwrap();
        let due = Utc::now() + Duration::days(3);
        let scheduled = store
            .schedule_followup("user-a", &hint("acme"), due, FollowupChannel::Email, None)
            .unwrap();

        store.complete_followup("user-a", scheduled.followup_id).unwrap();
        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps[0].followups[0].status, FollowupStatus::Completed);

        store
            .reschedule_followup("user-a", scheduled.followup_id, due + Duration::days(7))
            .unwrap();
        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps[0].followups[0].status, FollowupStatus::Pending);

        store.cancel_followup("user-a", scheduled.followup_id).unwrap();
        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps[0].followups[0].status, FollowupStatus::Cancelled);
    }

    #[test]
    fn test_due_followups_only_pending_and_past_due() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Acme", "Engineer")).unwrap();
        let past = Utc::now() - Duration::hours(2);
        let future = Utc::now() + Duration::days(2);

        let overdue = store
            .schedule_followup("user-a", &hint("acme"), past, FollowupChannel::Call, None)
            .unwrap();
        store
            .schedule_followup("user-a", &hint("acme"), future, FollowupChannel::Email, None)
            .unwrap();
        let cancelled = store
            .schedule_followup("user-a", &hint("acme"), past, FollowupChannel::Email, None)
            .unwrap();
        store.cancel_followup("user-a", cancelled.followup_id).unwrap();

        let due = store.due_followups("user-a");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].followup.id, overdue.followup_id);
    }

    #[test]
    fn test_search_empty_filters_returns_all_sorted_by_updated_at() {
        let store = ApplicationStore::new();
        let first = store.upsert_application("user-a", draft("Alpha", "Engineer")).unwrap();
        store.upsert_application("user-a", draft("Beta", "Engineer")).unwrap();
        store.upsert_application("user-a", draft("Gamma", "Engineer")).unwrap();
        // Touch the oldest so it becomes the most recently updated.
        store
            .update_status("user-a", &ApplicationRef::Id(first.application_id), StatusStage::Applied)
            .unwrap();

        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps.len(), 3);
        assert_eq!(apps[0].id, first.application_id);
        for pair in apps.windows(2) {
            assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }

    #[test]
    fn test_search_filters_and_combined() {
        let store = ApplicationStore::new();
        let mut remote = draft("Acme", "Engineer");
        remote.remote_ok = Some(true);
        remote.location = Some("Berlin, Germany".to_string());
        store.upsert_application("user-a", remote).unwrap();

        let mut onsite = draft("Acme", "Designer");
        onsite.remote_ok = Some(false);
        onsite.location = Some("Berlin, Germany".to_string());
        store.upsert_application("user-a", onsite).unwrap();

        store.update_status("user-a", &hint("engineer"), StatusStage::Applied).unwrap();

        let filters = SearchFilters {
            stages: vec![StatusStage::Applied, StatusStage::Onsite],
            company: Some(" ACME ".to_string()),
            location: Some("berlin".to_string()),
            remote_ok: Some(true),
            ..SearchFilters::default()
        };
        let apps = store.search("user-a", &filters).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].role_title, "Engineer");
    }

    #[test]
    fn test_search_rejects_inverted_time_range() {
        let store = ApplicationStore::new();
        let filters = SearchFilters {
            from: Some(Utc::now()),
            to: Some(Utc::now() - Duration::days(1)),
            ..SearchFilters::default()
        };
        assert!(matches!(
            store.search("user-a", &filters).unwrap_err(),
            AppError::ValidationError(_)
        ));
    }

    #[test]
    fn test_search_time_range_on_created_at() {
        let store = ApplicationStore::new();
        let old = store.upsert_application("user-a", draft("Old Corp", "Engineer")).unwrap();
        store.upsert_application("user-a", draft("New Corp", "Engineer")).unwrap();
        age_application(&store, "user-a", old.application_id, 30);

        let filters = SearchFilters {
            time_field: Some(TimeField::CreatedAt),
            from: Some(Utc::now() - Duration::days(7)),
            ..SearchFilters::default()
        };
        let apps = store.search("user-a", &filters).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].company, "New Corp");
    }

    #[test]
    fn test_named_range_calendar_bounds() {
        // Wednesday 2026-03-18 12:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 18, 12, 0, 0).unwrap();

        let (start, end) = NamedRange::ThisWeek.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 23, 0, 0, 0).unwrap());

        let (start, end) = NamedRange::LastWeek.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap());

        let (start, end) = NamedRange::ThisMonth.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());

        let (start, end) = NamedRange::LastMonth.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());

        // Year boundary: last month of January is December of the prior year.
        let january = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let (start, end) = NamedRange::LastMonth.bounds(january);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_cross_tenant_isolation() {
        let store = ApplicationStore::new();
        store.upsert_application("user-a", draft("Google", "Engineer")).unwrap();
        store.upsert_application("user-a", draft("Stripe", "Engineer")).unwrap();
        store.upsert_application("user-b", draft("Google", "Engineer")).unwrap();

        // Search and summary for B never see A's records, whatever the filters.
        assert_eq!(store.search("user-b", &SearchFilters::default()).unwrap().len(), 1);
        let broad = SearchFilters {
            company: Some("Google".to_string()),
            ..SearchFilters::default()
        };
        assert_eq!(store.search("user-b", &broad).unwrap().len(), 1);
        assert_eq!(store.summarize("user-b").total, 1);
        assert_eq!(store.summarize("user-a").total, 2);

        // Dedup keys are per user: B's Google record did not merge into A's.
        assert_eq!(store.application_count(), 3);

        // A reference hint for B cannot reach A's applications.
        assert!(store.update_status("user-b", &hint("stripe"), StatusStage::Applied).is_err());
    }

    #[test]
    fn test_summarize_success_rate() {
        let store = ApplicationStore::new();
        assert_eq!(store.summarize("user-a").success_rate, 0.0);

        for (company, stage) in [
            ("A", StatusStage::Offer),
            ("B", StatusStage::Rejected),
            ("C", StatusStage::Rejected),
            ("D", StatusStage::Withdrawn),
            ("E", StatusStage::Applied),
            ("F", StatusStage::Draft),
        ] {
            store.upsert_application("user-a", draft(company, "Engineer")).unwrap();
            store.update_status("user-a", &hint(company), stage).unwrap();
        }

        let summary = store.summarize("user-a");
        assert_eq!(summary.total, 6);
        assert_eq!(summary.offers, 1);
        assert_eq!(summary.active_applications, 1);
        assert!((summary.success_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(summary.status_breakdown.get("rejected"), Some(&2));

        // No terminal stages at all: rate pins to zero, not NaN.
        let store2 = ApplicationStore::new();
        store2.upsert_application("user-b", draft("A", "Engineer")).unwrap();
        assert_eq!(store2.summarize("user-b").success_rate, 0.0);
    }

    #[test]
    fn test_search_result_cap() {
        let store = ApplicationStore::new();
        for i in 0..(SEARCH_RESULT_CAP + 5) {
            store
                .upsert_application("user-a", draft(&format!("Company {}", i), "Engineer"))
                .unwrap();
        }
        let apps = store.search("user-a", &SearchFilters::default()).unwrap();
        assert_eq!(apps.len(), SEARCH_RESULT_CAP);
    }
}
