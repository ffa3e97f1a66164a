//! # Function Tool Dispatcher
//!
//! Maps the structured `{name, arguments}` calls the agent emits mid-turn
//! onto exactly one application-store operation each, and turns the outcome
//! back into the `{success, message, ...}` JSON the agent reads to phrase
//! its spoken reply.
//!
//! ## Failure Contract:
//! Dispatch never raises out of the turn. Unknown tools, malformed
//! arguments and domain failures all come back as `{success: false}` results
//! with a message the agent can say out loud — the conversation continues
//! either way. Each call is independent; there is no transaction spanning
//! multiple calls within one turn.

use crate::error::{AppError, AppResult};
use crate::store::engine::{ApplicationStore, NamedRange, SearchFilters, TimeField};
use crate::store::models::{
    Application, ApplicationDraft, ApplicationRef, FollowupChannel, StatusStage,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One structured call emitted by the agent service.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Dispatches tool calls for one server process. Cheap to clone per session.
#[derive(Clone)]
pub struct ToolDispatcher {
    store: Arc<ApplicationStore>,
}

impl ToolDispatcher {
    pub fn new(store: Arc<ApplicationStore>) -> Self {
        Self { store }
    }

    /// Dispatch one call on behalf of `user_id`.
    ///
    /// The agent's turn is suspended until this returns; the store work is
    /// synchronous, so the result comes back on the same call.
    pub fn dispatch(&self, user_id: &str, call: &ToolCall) -> Value {
        debug!(user_id = %user_id, tool = %call.name, "dispatching tool call");
        match self.try_dispatch(user_id, call) {
            Ok(result) => result,
            Err(err) => {
                if err.is_recoverable() {
                    debug!(tool = %call.name, error = %err, "tool call failed");
                } else {
                    warn!(tool = %call.name, error = %err, "tool call failed");
                }
                failure_result(&err)
            }
        }
    }

    fn try_dispatch(&self, user_id: &str, call: &ToolCall) -> AppResult<Value> {
        match call.name.as_str() {
            "add_job_application" => self.add_job_application(user_id, &call.arguments),
            "update_application_status" => self.update_application_status(user_id, &call.arguments),
            "add_application_note" => self.add_application_note(user_id, &call.arguments),
            "schedule_followup" => self.schedule_followup(user_id, &call.arguments),
            "complete_followup" => self.complete_followup(user_id, &call.arguments),
            "cancel_followup" => self.cancel_followup(user_id, &call.arguments),
            "reschedule_followup" => self.reschedule_followup(user_id, &call.arguments),
            "get_due_followups" => self.get_due_followups(user_id),
            "get_application_notes" => self.get_application_notes(user_id, &call.arguments),
            "search_applications" => self.search_applications(user_id, &call.arguments),
            "get_all_applications" => self.get_all_applications(user_id),
            "get_pipeline_summary" => self.get_pipeline_summary(user_id),
            other => Err(AppError::UnknownTool(other.to_string())),
        }
    }

    fn add_job_application(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            company: String,
            role_title: String,
            #[serde(default)]
            location: Option<String>,
            #[serde(default)]
            source: Option<String>,
            #[serde(default)]
            job_post_url: Option<String>,
            #[serde(default)]
            status_stage: Option<String>,
            #[serde(default)]
            salary_min: Option<f64>,
            #[serde(default)]
            salary_max: Option<f64>,
            #[serde(default)]
            currency: Option<String>,
            #[serde(default)]
            remote_ok: Option<bool>,
            #[serde(default)]
            skills_required: Option<Vec<String>>,
            #[serde(default)]
            job_posted_date: Option<String>,
            // Optional initial note and follow-up, attached after the upsert.
            #[serde(default)]
            note: Option<String>,
            #[serde(default)]
            due_at: Option<String>,
            #[serde(default)]
            channel: Option<String>,
        }
        let args: Args = parse_args("add_job_application", arguments)?;

        let draft = ApplicationDraft {
            company: args.company,
            role_title: args.role_title,
            location: args.location,
            source: args.source,
            job_post_url: args.job_post_url,
            status_stage: args.status_stage.as_deref().map(parse_stage).transpose()?,
            salary_min: args.salary_min,
            salary_max: args.salary_max,
            currency: args.currency,
            remote_ok: args.remote_ok,
            skills_required: args.skills_required,
            job_posted_date: args.job_posted_date.as_deref().map(parse_timestamp).transpose()?,
        };
        let outcome = self.store.upsert_application(user_id, draft)?;
        let app_ref = ApplicationRef::Id(outcome.application_id);

        if let Some(note) = args.note.as_deref() {
            self.store.add_note(user_id, &app_ref, note)?;
        }
        if let Some(due_at) = args.due_at.as_deref() {
            let due_at = parse_timestamp(due_at)?;
            let channel = args.channel.as_deref().map(parse_channel).transpose()?;
            self.store.schedule_followup(
                user_id,
                &app_ref,
                due_at,
                channel.unwrap_or(FollowupChannel::Email),
                None,
            )?;
        }

        let message = if outcome.updated {
            format!(
                "Updated existing {} position at {}",
                outcome.role_title, outcome.company
            )
        } else {
            format!("Added {} position at {}", outcome.role_title, outcome.company)
        };
        Ok(json!({
            "success": true,
            "message": message,
            "application_id": outcome.application_id,
            "updated": outcome.updated,
        }))
    }

    fn update_application_status(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            application_ref: String,
            status_stage: String,
        }
        let args: Args = parse_args("update_application_status", arguments)?;
        let stage = parse_stage(&args.status_stage)?;
        let change = self.store.update_status(
            user_id,
            &ApplicationRef::from_raw(&args.application_ref),
            stage,
        )?;
        Ok(json!({
            "success": true,
            "message": format!(
                "Status updated to {} for {} {}",
                stage.as_str(), change.company, change.role_title
            ),
            "application_id": change.application_id,
        }))
    }

    fn add_application_note(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            application_ref: String,
            note: String,
        }
        let args: Args = parse_args("add_application_note", arguments)?;
        let added = self.store.add_note(
            user_id,
            &ApplicationRef::from_raw(&args.application_ref),
            &args.note,
        )?;
        Ok(json!({
            "success": true,
            "message": format!("Note added for {} {}", added.company, added.role_title),
            "application_id": added.application_id,
            "note_id": added.note_id,
        }))
    }

    fn schedule_followup(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            application_ref: String,
            due_at: String,
            #[serde(default)]
            channel: Option<String>,
            #[serde(default)]
            note: Option<String>,
        }
        let args: Args = parse_args("schedule_followup", arguments)?;
        let due_at = parse_timestamp(&args.due_at)?;
        let channel = args
            .channel
            .as_deref()
            .map(parse_channel)
            .transpose()?
            .unwrap_or(FollowupChannel::Email);
        let scheduled = self.store.schedule_followup(
            user_id,
            &ApplicationRef::from_raw(&args.application_ref),
            due_at,
            channel,
            args.note,
        )?;
        Ok(json!({
            "success": true,
            "message": format!(
                "Follow-up scheduled for {} on {}",
                scheduled.company,
                scheduled.due_at.format("%Y-%m-%d")
            ),
            "application_id": scheduled.application_id,
            "followup_id": scheduled.followup_id,
        }))
    }

    fn complete_followup(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        let followup_id = parse_followup_id("complete_followup", arguments)?;
        self.store.complete_followup(user_id, followup_id)?;
        Ok(json!({
            "success": true,
            "message": "Marked the follow-up as completed",
            "followup_id": followup_id,
        }))
    }

    fn cancel_followup(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        let followup_id = parse_followup_id("cancel_followup", arguments)?;
        self.store.cancel_followup(user_id, followup_id)?;
        Ok(json!({
            "success": true,
            "message": "Cancelled the follow-up",
            "followup_id": followup_id,
        }))
    }

    fn reschedule_followup(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            followup_id: String,
            due_at: String,
        }
        let args: Args = parse_args("reschedule_followup", arguments)?;
        let followup_id = parse_uuid("followup_id", &args.followup_id)?;
        let due_at = parse_timestamp(&args.due_at)?;
        self.store.reschedule_followup(user_id, followup_id, due_at)?;
        Ok(json!({
            "success": true,
            "message": format!("Follow-up moved to {}", due_at.format("%Y-%m-%d")),
            "followup_id": followup_id,
        }))
    }

    fn get_due_followups(&self, user_id: &str) -> AppResult<Value> {
        let due = self.store.due_followups(user_id);
        let message = if due.is_empty() {
            "No follow-ups are due right now.".to_string()
        } else {
            let companies: Vec<&str> = due.iter().take(3).map(|d| d.company.as_str()).collect();
            format!(
                "You have {} follow-up{} due, including {}",
                due.len(),
                if due.len() == 1 { "" } else { "s" },
                companies.join(", ")
            )
        };
        Ok(json!({
            "success": true,
            "message": message,
            "followups": due,
            "count": due.len(),
        }))
    }

    fn get_application_notes(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            application_ref: String,
        }
        let args: Args = parse_args("get_application_notes", arguments)?;
        let notes = self
            .store
            .notes(user_id, &ApplicationRef::from_raw(&args.application_ref))?;
        Ok(json!({
            "success": true,
            "message": format!(
                "Found {} note{}",
                notes.len(),
                if notes.len() == 1 { "" } else { "s" }
            ),
            "notes": notes,
            "count": notes.len(),
        }))
    }

    fn search_applications(&self, user_id: &str, arguments: &Value) -> AppResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            status_stage: Option<String>,
            #[serde(default)]
            status_stages: Option<Vec<String>>,
            #[serde(default)]
            company: Option<String>,
            #[serde(default)]
            location: Option<String>,
            #[serde(default)]
            remote_ok: Option<bool>,
            #[serde(default)]
            time_range: Option<String>,
            #[serde(default)]
            time_field: Option<String>,
            #[serde(default)]
            from: Option<String>,
            #[serde(default)]
            to: Option<String>,
        }
        let args: Args = parse_args("search_applications", arguments)?;

        let mut stages = Vec::new();
        if let Some(stage) = args.status_stage.as_deref() {
            stages.push(parse_stage(stage)?);
        }
        for stage in args.status_stages.unwrap_or_default() {
            let stage = parse_stage(&stage)?;
            if !stages.contains(&stage) {
                stages.push(stage);
            }
        }

        let filters = SearchFilters {
            time_field: args.time_field.as_deref().map(parse_time_field).transpose()?,
            named_range: args.time_range.as_deref().map(parse_named_range).transpose()?,
            from: args.from.as_deref().map(parse_timestamp).transpose()?,
            to: args.to.as_deref().map(parse_timestamp).transpose()?,
            stages,
            company: args.company,
            location: args.location,
            remote_ok: args.remote_ok,
        };
        let applications = self.store.search(user_id, &filters)?;

        if applications.is_empty() {
            return Ok(json!({
                "success": true,
                "message": "No applications found matching your criteria.",
                "applications": [],
                "count": 0,
            }));
        }

        let breakdown = stage_breakdown(&applications);
        let summary_parts: Vec<String> = breakdown
            .iter()
            .map(|(stage, count)| format!("{} {}", count, stage))
            .collect();
        let mut message = format!(
            "Found {} application{}: {}",
            applications.len(),
            if applications.len() == 1 { "" } else { "s" },
            summary_parts.join(", ")
        );
        let companies = leading_companies(&applications);
        if !companies.is_empty() {
            message.push_str(&format!(" at companies including {}", companies.join(", ")));
        }

        Ok(json!({
            "success": true,
            "message": message,
            "applications": applications,
            "count": applications.len(),
            "status_breakdown": breakdown,
        }))
    }

    fn get_all_applications(&self, user_id: &str) -> AppResult<Value> {
        let applications = self.store.search(user_id, &SearchFilters::default())?;

        if applications.is_empty() {
            return Ok(json!({
                "success": true,
                "message": "You don't have any job applications in your pipeline yet.",
                "applications": [],
                "count": 0,
            }));
        }

        let breakdown = stage_breakdown(&applications);
        let summary_parts: Vec<String> = breakdown
            .iter()
            .map(|(stage, count)| format!("{} {}", count, stage))
            .collect();
        let mut message = format!(
            "You have {} total application{}: {}",
            applications.len(),
            if applications.len() == 1 { "" } else { "s" },
            summary_parts.join(", ")
        );
        let recent = leading_companies(&applications);
        if !recent.is_empty() {
            message.push_str(&format!(
                ". Your most recent applications are at {}",
                recent.join(", ")
            ));
        }

        Ok(json!({
            "success": true,
            "message": message,
            "applications": applications,
            "count": applications.len(),
            "status_breakdown": breakdown,
        }))
    }

    fn get_pipeline_summary(&self, user_id: &str) -> AppResult<Value> {
        let summary = self.store.summarize(user_id);
        Ok(json!({
            "success": true,
            "summary": summary,
        }))
    }
}

fn parse_args<'a, T: Deserialize<'a>>(tool: &str, arguments: &'a Value) -> AppResult<T> {
    T::deserialize(arguments).map_err(|err| {
        AppError::ValidationError(format!("invalid arguments for {}: {}", tool, err))
    })
}

fn parse_stage(raw: &str) -> AppResult<StatusStage> {
    StatusStage::parse(raw.trim()).ok_or_else(|| {
        AppError::ValidationError(format!(
            "'{}' is not a pipeline stage; expected one of: {}",
            raw,
            StatusStage::ALL.map(|s| s.as_str()).join(", ")
        ))
    })
}

fn parse_channel(raw: &str) -> AppResult<FollowupChannel> {
    FollowupChannel::parse(raw.trim()).ok_or_else(|| {
        AppError::ValidationError(format!(
            "'{}' is not a follow-up channel; expected email, call, linkedin or other",
            raw
        ))
    })
}

fn parse_time_field(raw: &str) -> AppResult<TimeField> {
    match raw.trim() {
        "created_at" => Ok(TimeField::CreatedAt),
        "updated_at" => Ok(TimeField::UpdatedAt),
        other => Err(AppError::ValidationError(format!(
            "'{}' is not a time field; expected created_at or updated_at",
            other
        ))),
    }
}

fn parse_named_range(raw: &str) -> AppResult<NamedRange> {
    NamedRange::parse(raw.trim()).ok_or_else(|| {
        AppError::ValidationError(format!(
            "'{}' is not a time range; expected last_week, this_week, last_month or this_month",
            raw
        ))
    })
}

/// Parse an absolute timestamp. Accepts RFC 3339, or a bare date which is
/// read as midnight UTC. Relative phrases ("next Friday") are the upstream
/// agent's job to resolve before the call reaches this boundary.
fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    Err(AppError::ValidationError(format!(
        "'{}' is not an absolute timestamp; expected RFC 3339 or YYYY-MM-DD",
        raw
    )))
}

fn parse_uuid(field: &str, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::ValidationError(format!("'{}' is not a valid {}", raw, field)))
}

fn parse_followup_id(tool: &str, arguments: &Value) -> AppResult<Uuid> {
    #[derive(Deserialize)]
    struct Args {
        followup_id: String,
    }
    let args: Args = parse_args(tool, arguments)?;
    parse_uuid("followup_id", &args.followup_id)
}

fn stage_breakdown(applications: &[Application]) -> BTreeMap<&'static str, usize> {
    let mut breakdown = BTreeMap::new();
    for app in applications {
        *breakdown.entry(app.status_stage.as_str()).or_insert(0) += 1;
    }
    breakdown
}

/// Up to three companies from the most recently updated applications, for
/// the spoken summary. Input is already `updated_at`-descending.
fn leading_companies(applications: &[Application]) -> Vec<String> {
    let mut companies = Vec::new();
    for app in applications {
        if !companies.contains(&app.company) {
            companies.push(app.company.clone());
        }
        if companies.len() == 3 {
            break;
        }
    }
    companies
}

fn failure_result(err: &AppError) -> Value {
    let message = match err {
        AppError::UnknownTool(name) => format!(
            "I don't have a tool named '{}', so I couldn't complete that action.",
            name
        ),
        AppError::ApplicationNotFound(msg) => msg.clone(),
        AppError::ValidationError(msg) => msg.clone(),
        other => other.to_string(),
    };
    json!({
        "success": false,
        "error_code": err.code(),
        "message": message,
    })
}
