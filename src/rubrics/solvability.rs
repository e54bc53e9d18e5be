//! Issue solvability: which signals of a resolvable report are present.

use crate::feature::Feature;

pub const TOOL_NAME: &str = "analyze_issue_solvability";
pub const TOOL_DESCRIPTION: &str = "Analyze an issue for solvability factors";

pub const SYSTEM_MESSAGE: &str = r#"You are an AI issue analyzer evaluating GitHub issues, bug reports, and feature requests for solvability. Your task is to identify key characteristics that indicate whether an issue can be effectively resolved.

========================
ANALYSIS FRAMEWORK
========================
Analyze the provided issue text and determine which solvability factors are present. For each factor:
1) Set the corresponding boolean to TRUE if the factor is clearly present
2) Provide a brief rationale with specific evidence from the issue text

PROBLEM DEFINITION
- has_clear_problem_statement: The issue clearly describes what is wrong or what needs to be implemented.
- has_reproduction_steps: Specific steps are provided to reproduce the issue.
- has_expected_behavior: What the user expects to happen is clearly stated.
- has_actual_behavior: What actually happens (the problem) is clearly described.

TECHNICAL DETAILS
- has_error_messages: Specific error messages, stack traces, or error codes are included.
- has_environment_info: Information about the system, platform, or environment is provided.
- has_version_info: Version numbers of relevant software, libraries, or tools are specified.
- has_code_examples: Code snippets, configuration files, or relevant code is included.

CONTEXT AND SCOPE
- has_minimal_example: A minimal, focused example that demonstrates the issue.
- has_scope_definition: The boundaries and scope of the issue are clearly defined.
- has_impact_description: The impact, severity, or consequences of the issue are described.
- shows_investigation_effort: Evidence that the reporter has investigated or attempted solutions.

========================
QUALITY STANDARDS
========================
- Evidence-based: Only mark TRUE if you can point to specific text in the issue
- Conservative approach: When uncertain, mark FALSE and explain why
- Brief rationales: Keep explanations concise but specific
- Quote evidence: Reference specific phrases or sections when possible"#;

pub const INSTRUCTION_MESSAGE: &str = "Analyze the following issue for solvability factors:";

pub fn features() -> Vec<Feature> {
    vec![
        Feature::binary(
            "has_clear_problem_statement",
            "Issue has a clear, well-defined problem statement",
        ),
        Feature::binary(
            "has_reproduction_steps",
            "Issue includes steps to reproduce the problem",
        ),
        Feature::binary(
            "has_expected_behavior",
            "Issue describes what the expected behavior should be",
        ),
        Feature::binary(
            "has_actual_behavior",
            "Issue describes what actually happens (the bug/problem)",
        ),
        Feature::binary(
            "has_error_messages",
            "Issue includes relevant error messages or logs",
        ),
        Feature::binary(
            "has_environment_info",
            "Issue provides environment/system information",
        ),
        Feature::binary("has_version_info", "Issue specifies software/library versions"),
        Feature::binary(
            "has_code_examples",
            "Issue includes relevant code examples or snippets",
        ),
        Feature::binary(
            "has_minimal_example",
            "Issue provides a minimal reproducible example",
        ),
        Feature::binary(
            "has_scope_definition",
            "Issue clearly defines the scope and boundaries of the problem",
        ),
        Feature::binary(
            "has_impact_description",
            "Issue describes the impact or consequences of the problem",
        ),
        Feature::binary(
            "shows_investigation_effort",
            "Issue shows evidence of investigation or debugging attempts",
        ),
        Feature::text(
            "additional_notes",
            "Any additional observations about issue solvability",
        ),
    ]
}
