//! # Agent Profiles
//!
//! The agent variants that can answer a session. Modeled as a plain tagged
//! union with a shared capability surface (`name`, `instructions`,
//! `tool_names`) — the session holds the current variant and swaps it
//! atomically when the upstream agent service emits a handoff event, so no
//! trait objects or inheritance are involved.

use serde::{Deserialize, Serialize};

/// Available agent variants.
///
/// `JobTracker` is the default, full-capability assistant. `FollowupCoach`
/// is a narrower persona the tracker can hand off to when the conversation
/// turns into working through pending reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentProfile {
    JobTracker,
    FollowupCoach,
}

impl Default for AgentProfile {
    fn default() -> Self {
        AgentProfile::JobTracker
    }
}

impl AgentProfile {
    /// Display name, included in every `history.updated` frame so the client
    /// can show who is currently answering.
    pub fn name(&self) -> &'static str {
        match self {
            AgentProfile::JobTracker => "Job Application Tracker",
            AgentProfile::FollowupCoach => "Follow-up Coach",
        }
    }

    /// Resolve a handoff target by display name.
    pub fn by_name(name: &str) -> Option<AgentProfile> {
        match name {
            "Job Application Tracker" => Some(AgentProfile::JobTracker),
            "Follow-up Coach" => Some(AgentProfile::FollowupCoach),
            _ => None,
        }
    }

    /// System instructions forwarded to the upstream agent service for this
    /// variant.
    pub fn instructions(&self) -> &'static str {
        match self {
            AgentProfile::JobTracker => {
                "You are a helpful job application tracking assistant. Users speak \
                 naturally about their job search; interpret their intent and use the \
                 appropriate function. Track applications through the hiring pipeline \
                 (draft, applied, hr_screen, tech_screen, onsite, offer, rejected, \
                 withdrawn), add notes, schedule follow-up reminders, and answer \
                 questions about the pipeline. Always confirm actions taken. Hand off \
                 to the Follow-up Coach when the user wants to work through their \
                 pending follow-ups."
            }
            AgentProfile::FollowupCoach => {
                "You help the user work through their pending follow-up reminders one \
                 at a time: surface what is due, mark reminders completed or \
                 cancelled, and reschedule the ones the user wants to push out. Hand \
                 back to the Job Application Tracker for anything beyond follow-ups."
            }
        }
    }

    /// Tool names this variant advertises to the agent service.
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            AgentProfile::JobTracker => &[
                "add_job_application",
                "update_application_status",
                "add_application_note",
                "schedule_followup",
                "get_application_notes",
                "search_applications",
                "get_all_applications",
                "get_pipeline_summary",
                "get_due_followups",
            ],
            AgentProfile::FollowupCoach => &[
                "get_due_followups",
                "schedule_followup",
                "complete_followup",
                "cancel_followup",
                "reschedule_followup",
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for profile in [AgentProfile::JobTracker, AgentProfile::FollowupCoach] {
            assert_eq!(AgentProfile::by_name(profile.name()), Some(profile));
        }
        assert_eq!(AgentProfile::by_name("Unknown Agent"), None);
    }

    #[test]
    fn test_default_is_job_tracker() {
        assert_eq!(AgentProfile::default(), AgentProfile::JobTracker);
    }
}
