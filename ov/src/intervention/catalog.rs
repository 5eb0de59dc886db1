//! Notification and prompt copy catalog
//!
//! Handlebars templates keyed by issue kind. Every placeholder has a
//! fallback so rendered copy never contains gaps or the literal token
//! `unknown`.

use crate::analyzer::IssueKind;

/// Copy and routing for one issue kind
pub struct CatalogEntry {
    pub title: &'static str,
    pub message: &'static str,
    pub prompt: &'static str,
    pub agent: &'static str,
    /// Fallback values substituted for missing or empty context keys
    pub defaults: &'static [(&'static str, &'static str)],
}

pub fn entry_for(kind: IssueKind) -> CatalogEntry {
    match kind {
        IssueKind::LoopDetected => CatalogEntry {
            title: "Loop detected",
            message: "{{tool_name}} repeated {{repeat_count}}x",
            prompt: "The {{tool_name}} tool has repeated {{repeat_count}} times without progress. \
                     Diagnose why the workflow is looping and unblock it.",
            agent: "debugger",
            defaults: &[("tool_name", "a tool"), ("repeat_count", "several")],
        },
        IssueKind::ExplicitFailure => CatalogEntry {
            title: "Command failed",
            message: "{{cmd}} failed: {{error}}",
            prompt: "The {{cmd}} command reported a failure: {{error}}. Investigate and fix the root cause.",
            agent: "debugger",
            defaults: &[("cmd", "a command"), ("error", "see workflow log")],
        },
        IssueKind::PhaseStuck => CatalogEntry {
            title: "Phase stalled",
            message: "{{cmd}} {{phase}} quiet {{stalled_secs}}s",
            prompt: "The {{phase}} phase of {{cmd}} has made no progress for {{stalled_secs}} seconds. \
                     Find out where it is stuck.",
            agent: "debugger",
            defaults: &[("cmd", "the workflow"), ("phase", "current"), ("stalled_secs", "many")],
        },
        IssueKind::Silence => CatalogEntry {
            title: "Workflow silent",
            message: "No activity for {{quiet_secs}}s",
            prompt: "The workflow has logged nothing for {{quiet_secs}} seconds while a command is active. \
                     Check whether the session stalled.",
            agent: "workflow-coach",
            defaults: &[("quiet_secs", "many")],
        },
        IssueKind::TddViolation => CatalogEntry {
            title: "TDD violation",
            message: "Green started before red completed",
            prompt: "A green phase started without a completed red phase. Stop, write the failing test first, \
                     then return to implementation.",
            agent: "workflow-coach",
            defaults: &[],
        },
        IssueKind::OutOfOrder => CatalogEntry {
            title: "Out of order",
            message: "{{cmd}} started before {{expected}}",
            prompt: "The {{cmd}} command started while {{expected}} has not completed. \
                     Restore the workflow to its intended sequence.",
            agent: "workflow-coach",
            defaults: &[("cmd", "a command"), ("expected", "an earlier step")],
        },
        IssueKind::MissingMilestones => CatalogEntry {
            title: "Milestones missing",
            message: "{{cmd}} completed with gaps",
            prompt: "The {{cmd}} command completed without its expected milestones. \
                     Verify the skipped steps actually happened.",
            agent: "workflow-coach",
            defaults: &[("cmd", "a command")],
        },
        IssueKind::AbruptStop => CatalogEntry {
            title: "Workflow stopped",
            message: "{{cmd}} left open for {{idle_secs}}s",
            prompt: "The {{cmd}} command was left open with no completion for {{idle_secs}} seconds. \
                     Resume or close it out.",
            agent: "workflow-coach",
            defaults: &[("cmd", "a command"), ("idle_secs", "many")],
        },
        IssueKind::AbandonedAgent => CatalogEntry {
            title: "Agent abandoned",
            message: "{{agent_type}} went quiet",
            prompt: "A delegated {{agent_type}} agent spawned but never completed. \
                     Check its output and either finish or respawn it.",
            agent: "debugger",
            defaults: &[("agent_type", "delegated")],
        },
        IssueKind::DecliningVelocity => CatalogEntry {
            title: "Velocity dropping",
            message: "Milestone rate halved",
            prompt: "Milestone throughput dropped to under half the previous rate. \
                     Check for friction or hidden blockers.",
            agent: "workflow-coach",
            defaults: &[],
        },
        IssueKind::Regression => CatalogEntry {
            title: "Regression",
            message: "Passing checks now fail",
            prompt: "Checks that previously passed are failing again. Bisect the recent changes and fix the regression.",
            agent: "debugger",
            defaults: &[],
        },
        IssueKind::IronLawViolation => CatalogEntry {
            title: "Law violation",
            message: "{{law}} violated",
            prompt: "Workflow law {{law}} was violated: {{message}}. Correct course before continuing.",
            agent: "workflow-coach",
            defaults: &[("law", "a workflow law"), ("message", "see pre-check output")],
        },
        IssueKind::IronLawRepeated => CatalogEntry {
            title: "Law repeated",
            message: "{{law}} violated again",
            prompt: "Workflow law {{law}} has been violated repeatedly: {{message}}. \
                     Re-read the laws document and correct course immediately.",
            agent: "workflow-coach",
            defaults: &[("law", "a workflow law"), ("message", "see pre-check output")],
        },
        IssueKind::IronLawIgnored => CatalogEntry {
            title: "Law ignored",
            message: "{{law}} pre-check ignored",
            prompt: "A failing pre-check for {{law}} was ignored. Honor the pre-check before proceeding.",
            agent: "workflow-coach",
            defaults: &[("law", "a workflow law")],
        },
        IssueKind::SpecDriftStructural => CatalogEntry {
            title: "Spec drift",
            message: "Structure diverges from plan",
            prompt: "The implementation structure has drifted from the plan. \
                     Reconcile the plan or the code before shipping.",
            agent: "workflow-coach",
            defaults: &[],
        },
        IssueKind::SpecDriftCriteria => CatalogEntry {
            title: "Spec drift",
            message: "Acceptance criteria diverge",
            prompt: "The acceptance criteria no longer match what is being built. \
                     Reconcile them before shipping.",
            agent: "workflow-coach",
            defaults: &[],
        },
    }
}
