//! `switch_agent` (spec.md §4.6). A signal tool: its `execute()` contract is
//! just an acknowledgement shape — the actual agent swap, loop-guard, and
//! fallback-to-exec logic live in
//! [`crate::session::agent_session::AgentSession::dispatch_switch_agent`],
//! which the caller invokes before surfacing this outcome and ending the
//! stream.

use crate::tools::ToolOutcome;
use serde_json::json;

pub fn switch_agent_outcome(agent_id: &str) -> ToolOutcome {
    ToolOutcome::ok(json!({ "agentId": agent_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_echoes_the_requested_agent_id() {
        let outcome = switch_agent_outcome("exec");
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert_eq!(value["agentId"], "exec");
    }
}
