//! Conversation-level features: task context, agent behaviour, infrastructure.

use crate::feature::Feature;

pub const SENTIMENT_LABELS: [&str; 3] = ["Positive", "Negative", "Neutral"];

pub const TASK_TYPE_LABELS: [&str; 8] = [
    "Fix Bugs",
    "Implement Features",
    "Create Programs from Scratch",
    "Fix Failing Continuous Integration",
    "Fix Merge Conflicts",
    "Write Documentation",
    "Perform Deployments",
    "Perform Data Analysis",
];

pub const DEV_CLUSTER_LABELS: [&str; 4] = [
    "Web Development",
    "DevOps & Infrastructure",
    "AI Integration",
    "Code Management",
];

pub const SYSTEM_MESSAGE: &str = r#"You are an AI conversation annotator analyzing agent-environment interactions to identify failure patterns. You are NOT participating in the conversation; you are an external observer evaluating what went wrong.

========================
CONVERSATION STRUCTURE
========================
- Focus on the LAST AGENT MESSAGE.

========================
CONTEXT SOURCES
========================
Use all evidence: screenshots, code, logs, specs, file trees, error messages, prompts/system messages, and tool traces. Prefer short verbatim quotes (<=25 words) when supporting a claim.

========================
DETECTION FRAMEWORK
========================
Multiple issues can co-occur. For each issue:
1) Set the corresponding boolean to TRUE.
2) Provide a short, specific rationale quoting concrete evidence (agent actions, errors).

AGENT BEHAVIORAL ISSUES
- misunderstood_intention: Agent misunderstood the user's goal/intent.
- did_not_follow_instruction: Agent ignored or failed to comply with explicit instructions/system constraints.
- insufficient_analysis: Didn't explore existing materials sufficiently (prior code/docs/examples) before acting.
- insufficient_clarification: Failed to ask necessary questions before acting when requirements were ambiguous.
- improper_tool_use_or_setup: Misused tools/commands or had missing/incorrect dependencies/setup.
- loop_behavior: Repeats the same failed action 3+ times without strategy change.
- insufficient_testing: Skipped reasonable verification/tests for non-trivial or risky changes.
- insufficient_debugging: Did not investigate or reduce failing behavior when needed to make progress.
- incomplete_implementation: Delivered unfinished or non-functioning work.
- file_management_errors: Wrong paths, overwrites, misplaced/extra files (including unnecessary files).
- scope_creep: Implemented unrequested features without approval.
- risky_actions_or_permission: Risky steps without user's explicit consent.
- other_agent_issue: Any agent-side problem not covered above.

INFRASTRUCTURE (EXTERNAL vs AGENT-CAUSED)
- infrastructure_external_issue: Environment/platform limits outside agent control.
- infrastructure_agent_caused_issue: Infrastructure fault introduced by the agent's prior actions.

========================
QUALITY STANDARDS
========================
- Evidence Threshold: Mark TRUE only with specific evidence; prefer short quotes.
- Timing Awareness: If the user intervened mid-stream, consider whether the agent should have clarified earlier (flag insufficient_clarification if so).
- Conservative Defaults: When uncertain, mark FALSE and briefly explain why.
- No speculation: Tie every flagged issue to observable behavior or quoted text.
"#;

pub const INSTRUCTION_MESSAGE: &str = r#"=== END OF CONVERSATION TO ANALYZE ===

Fill the annotate_conversation function.

Goal
- Set only the booleans that clearly apply.

What to record
1) Agent behavioral issues (select all that apply)
   - Rationale: cite code/commands/errors or a short quote and explain in one sentence.

2) Infrastructure
   - infrastructure_external_issue_detected for environment/platform limits beyond agent control.
   - infrastructure_agent_caused_issue_detected for faults introduced by the agent's prior actions (e.g., orphaned server on port 8000).
   - Rationale: include the error/status line or brief description.

Evidence & quality
- Prefer concrete, minimal quotes; avoid speculation. If evidence is insufficient, leave the flag false.

Quick disambiguation (common splits)
- insufficient_analysis vs insufficient_clarification: didn't look for existing work vs didn't ask when requirements were ambiguous.
- insufficient_testing vs insufficient_debugging: skipped reasonable verification vs didn't investigate a failing state enough to make progress.
"#;

/// Task context, 13 agent behavioural issues and 2 infrastructure issues.
pub fn features() -> Vec<Feature> {
    let mut features = vec![
        Feature::text(
            "user_goal_summary",
            "One sentence describing what the user is trying to accomplish.",
        ),
        Feature::classification(
            "overall_sentiment",
            "Classify the overall sentiment of the user's messages.",
            SENTIMENT_LABELS,
        ),
        Feature::classification(
            "task_type",
            "Classify the type of task into exactly one category. Choose from: Fix Bugs, Implement Features, \
             Create Programs from Scratch, Fix Failing Continuous Integration, Fix Merge Conflicts, \
             Write Documentation, Perform Deployments, Perform Data Analysis.",
            TASK_TYPE_LABELS,
        ),
        Feature::classification(
            "dev_cluster",
            "Choose the best-fitting development cluster: Web Development (frontend/backend, UI/UX, e-commerce), \
             DevOps & Infrastructure (CI/CD, Docker/Kubernetes, cloud, env config), \
             AI Integration (OpenAI/Anthropic/Gemini APIs, ML systems), \
             Code Management (Git ops, PRs, docs, bug fixes, features).",
            DEV_CLUSTER_LABELS,
        ),
    ];
    features.extend(agent_issue_features());
    features.extend(infrastructure_features());
    features
}

pub fn agent_issue_features() -> Vec<Feature> {
    vec![
        Feature::binary(
            "misunderstood_intention",
            "Agent misunderstood the user's goal/intent. Examples: User asked for a summary; agent produced a rewrite; \
             user wanted high-level bullets; agent delivered full code.",
        ),
        Feature::binary(
            "did_not_follow_instruction",
            "Agent ignored or failed to comply with explicit instructions/system constraints. \
             Examples: User: 'Do NOT push to main.' Agent pushes; System says not to create a PR unless the user asks \
             and the user didn't ask; agent creates a PR; user asked for bullet points only, agent gives long prose.",
        ),
        Feature::binary(
            "insufficient_analysis",
            "Didn't explore existing materials (prior code/docs/examples) before acting. Examples: User points to an \
             existing function/file that is relevant or already solves it; agent reinvents it.",
        ),
        Feature::binary(
            "insufficient_clarification",
            "Failed to ask necessary questions before acting when requirements were ambiguous. \
             Examples: Agent proceeds despite unclear acceptance criteria (locales, time zones, error thresholds) \
             then is corrected later.",
        ),
        Feature::binary(
            "improper_tool_use_or_setup",
            "Misused tools/commands or used inappropriate tools; missing/incorrect dependencies/setup. \
             Examples: wrong command syntax; using an inappropriate tool; import errors; wrong API URL; malformed auth header.",
        ),
        Feature::binary(
            "loop_behavior",
            "Repeats the same failed action 3+ times without strategy change.",
        ),
        Feature::binary(
            "insufficient_testing",
            "Skipped reasonable verification/tests for non-trivial or risky changes (trivial edits may be acceptable). \
             Examples: No run/validation for a new parser; no check that a migration applies cleanly; no sanity check of output.",
        ),
        Feature::binary(
            "insufficient_debugging",
            "Did not investigate or reduce failing behavior when needed to make progress. Examples: Ignores stack trace; \
             no isolation of failure; proceeds while errors persist.",
        ),
        Feature::binary(
            "incomplete_implementation",
            "Delivered unfinished or non-functioning work. Examples: TODO/FIXME left; stub methods; code that cannot run.",
        ),
        Feature::binary(
            "file_management_errors",
            "Wrong paths, overwrites, misplaced/extra (unnecessary) files. Examples: writes into wrong directory; \
             overwrites config; creates unwanted artifacts.",
        ),
        Feature::binary(
            "scope_creep",
            "Implemented unrequested features without approval. Examples: adds a dashboard or endpoint not asked for.",
        ),
        Feature::binary(
            "risky_actions_or_permission",
            "Risky steps without the user's explicit consent. Examples: git push to main; deleting existing files in a repo \
             (deleting files created by the agent itself is fine); altering credentials.",
        ),
        Feature::binary(
            "other_agent_issue",
            "Any other agent-side problem not covered above.",
        ),
    ]
}

pub fn infrastructure_features() -> Vec<Feature> {
    vec![
        Feature::binary(
            "infrastructure_external_issue",
            "Environment/platform limits outside agent control. Examples: provider outage; disk full on a managed runner; \
             missing enterprise API key; network failure not caused by agent.",
        ),
        Feature::binary(
            "infrastructure_agent_caused_issue",
            "Infrastructure faults introduced by the agent's prior actions. Examples: agent leaves server on port 8000, \
             so a later start on 8000 fails; agent fills disk with logs, so later writes fail.",
        ),
    ]
}
