//! Follow-up features for conversations where the user replied to the agent.

use crate::feature::Feature;

pub const FOLLOW_UP_TIMING_LABELS: [&str; 3] = ["mid_conversation", "post_completion", "no_follow_up"];

pub const SYSTEM_MESSAGE: &str = r#"You are an AI conversation annotator analyzing agent-user interactions to identify failure patterns. You are NOT participating in the conversation; you are an external observer evaluating what went wrong.

========================
CONVERSATION STRUCTURE
========================
- Focus on the LAST AGENT MESSAGE and the LAST USER MESSAGE (if any).
- Determine WHEN the user's follow-up occurred:
  - 'mid_conversation': The agent had not clearly finished or handed off.
  - 'post_completion': The agent signaled completion or handoff (e.g., final answer, 'done', 'all set').
  - 'no_follow_up': No user reply after the last agent message.

In your timing rationale, note what the agent was doing when the user intervened (quote brief evidence).

========================
CONTEXT SOURCES
========================
Use all evidence: screenshots, code, logs, specs, file trees, error messages, prompts/system messages, and tool traces. Prefer short verbatim quotes (<=25 words) when supporting a claim.

========================
DETECTION FRAMEWORK
========================
Multiple issues can co-occur. For each issue:
1) Set the corresponding boolean to TRUE.
2) Provide a short, specific rationale quoting concrete evidence (user quotes, agent actions, errors).

USER FOLLOW-UP PATTERNS
- clarification_or_restatement: User clarifies/restates or corrects interpretation.
- correction: Agent basically understood the intention, but executed it incorrectly (fix technique/parameters/details).
- direction_change: User adds new constraints/intent or asks questions that redirect the plan or scope. VCS update instructions (commit/push/PR) are not direction_change; tag them as vcs_update_requests.
- vcs_update_requests: User instructs forward-moving VCS tasks (commit, branch, push, open/merge a PR, tag). Reverts/resets/removals belong to removal_or_reversion_request.
- progress_or_scope_concern: User flags slowness, overcomplexity, or scope bloat.
- frustration_or_complaint: User shows dissatisfaction or irritation.
- removal_or_reversion_request: User asks to remove code/files or revert changes.
- other_user_issue: Any other notable user concern not covered above.

MUTUAL-EXCLUSIVITY RULE (Core Follow-up Set)
- By default, choose only one among: clarification_or_restatement, correction, direction_change, vcs_update_requests.
- Co-tag only when the user message clearly contains distinct parts that independently satisfy multiple categories.
- Tie-break order: 1) direction_change 2) vcs_update_requests 3) clarification_or_restatement 4) correction.

AGENT BEHAVIORAL ISSUES
- misunderstood_intention, did_not_follow_instruction, insufficient_analysis, insufficient_clarification,
  improper_tool_use_or_setup, loop_behavior, insufficient_testing, insufficient_debugging,
  incomplete_implementation, file_management_errors, scope_creep, risky_actions_or_permission, other_agent_issue.

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
- Identify when the user followed up (mid_conversation, post_completion, or no_follow_up) and what issues occurred.
- Set only the booleans that clearly apply. For the exclusive set (direction_change, clarification_or_restatement, correction, vcs_update_requests), choose one by default using the tie-break rules.

What to record
1) Follow-up timing
   - Choose the timing value and, in follow_up_timing_rationale, state what the agent was doing when the user replied and include a short quote.

2) User follow-up patterns (select all that apply)
   - Rationale: quote the user and explain in one sentence.

3) Agent behavioral issues (select all that apply)
   - Rationale: cite code/commands/errors or a short quote and explain in one sentence.

4) Infrastructure
   - Rationale: include the error/status line or brief description.

Evidence & quality
- Prefer concrete, minimal quotes; avoid speculation. If evidence is insufficient, leave the flag false.
- If the user intervened mid-stream and the request was ambiguous, consider insufficient_clarification.

Quick disambiguation (common splits)
- correction vs misunderstood_intention: right goal, wrong details vs wrong goal altogether.
- did_not_follow_instruction vs direction_change: ignored a clear instruction vs user adds new requirement later.
- Requests to revert/reset/remove belong to removal_or_reversion_request.
"#;

/// Follow-up timing plus 8 user follow-up patterns.
pub fn features() -> Vec<Feature> {
    vec![
        Feature::classification(
            "follow_up_timing",
            "WHEN did the user follow up? Choose exactly one: \
             mid_conversation: agent hadn't clearly finished; \
             post_completion: agent signaled completion/hand-off; \
             no_follow_up: no user message after the last agent message.",
            FOLLOW_UP_TIMING_LABELS,
        ),
        Feature::binary(
            "clarification_or_restatement",
            "User clarifies/restates or corrects interpretation. Examples: 'That's not what I meant...', \
             'I meant X, not Y.', 'Let me clarify...'",
        ),
        Feature::binary(
            "correction",
            "Agent broadly understood the intention but executed it incorrectly (technique/parameters/details). \
             Examples: 'Use DESC not ASC.', 'Right table, wrong WHERE clause.', 'Same approach, wrong sort key.'",
        ),
        Feature::binary(
            "direction_change",
            "User adds new constraints/intent not previously specified; scope/goal evolves. Examples: \
             'Also handle time zones.', 'We actually need streaming, not batch.', 'Support Windows too.'",
        ),
        Feature::binary(
            "vcs_update_requests",
            "User instructs forward-moving VCS updates: commit, create branch, push, open/merge PR, tag. \
             (Revert/reset/remove: use removal_or_reversion_request.)",
        ),
        Feature::binary(
            "progress_or_scope_concern",
            "User flags slowness, overcomplexity, or scope bloat. Examples: 'This is taking too long.', \
             'Try a simpler approach.', 'This goes beyond what I asked.'",
        ),
        Feature::binary(
            "frustration_or_complaint",
            "User expresses dissatisfaction or irritation. Examples: 'This is wrong.', 'You're not listening.', \
             excessive caps or punctuation ('!!!', '???').",
        ),
        Feature::binary(
            "removal_or_reversion_request",
            "User asks to remove or revert code/files/changes. Examples: 'Delete the new script.', \
             'Undo that migration.', 'Remove these outputs.', 'git revert'.",
        ),
        Feature::binary(
            "other_user_issue",
            "Any other notable user concern not covered above.",
        ),
    ]
}
