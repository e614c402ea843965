//! Recovery instruction templates.

use super::candidates::RecoveryCandidate;
use crate::config::RecoveryMode;

const TARGETED_TEMPLATE: &str = "\
The previous request failed because the conversation no longer fits the model's context window.

Provider error:
{error}

{deficit}Free space by calling `{tool}` with the IDs of the messages to remove. Prefer large tool \
calls and tool results that are no longer needed. Include a short `summary` of anything the \
conversation must keep. Copy IDs exactly as listed; do not answer the user yet.

Removal candidates (ID | role/type | size | preview):
```
{candidates}
```";

const COMPACTION_TEMPLATE: &str = "\
The conversation still does not fit the model's context window, even after targeted removal.

Provider error:
{error}

{deficit}Compact the history: call `{tool}` with the IDs of nearly all of the messages below and a \
`summary` that preserves the user's goals, decisions made so far and any facts still needed to \
finish the current request. Copy IDs exactly as listed; do not answer the user yet.

Messages (ID | role/type | size | preview):
```
{candidates}
```";

/// Render the instruction sent as the recovery run's user message.
pub fn render_instruction(
    mode: RecoveryMode,
    error_message: &str,
    candidates: &[RecoveryCandidate],
    removal_tool: &str,
    overflow_tokens: Option<usize>,
) -> String {
    let template = match mode {
        RecoveryMode::Targeted => TARGETED_TEMPLATE,
        RecoveryMode::Compaction => COMPACTION_TEMPLATE,
    };
    let deficit = overflow_tokens
        .map(|tokens| format!("At least {tokens} tokens must be freed.\n\n"))
        .unwrap_or_default();
    let listing = candidates
        .iter()
        .map(RecoveryCandidate::render)
        .collect::<Vec<_>>()
        .join("\n");

    template
        .replace("{error}", error_message.trim())
        .replace("{deficit}", &deficit)
        .replace("{tool}", removal_tool)
        .replace("{candidates}", &listing)
}
