//! `ask_user_question` (spec.md §4.6). Suspends the calling tool call on a
//! pending-prompt registry keyed by `(workspace, tool_call_id)` until the UI
//! submits answers, the turn is aborted, or the call is pre-filled (e.g.
//! replayed from a resumed turn that already carried answers).

use crate::runtime::AbortSignal;
use crate::tools::ToolOutcome;
use dashmap::DashMap;
use mux_protocol::WorkspaceId;
use serde_json::{json, Value};
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub question_id: String,
    pub value: String,
}

#[derive(Default)]
pub struct PendingQuestionRegistry {
    pending: DashMap<(WorkspaceId, String), oneshot::Sender<Vec<Answer>>>,
}

impl PendingQuestionRegistry {
    pub fn new() -> Self {
        Self { pending: DashMap::new() }
    }

    /// Submits answers for an outstanding prompt. Returns `false` if no
    /// prompt with that id is waiting (already answered, aborted, or never
    /// registered).
    pub fn submit(&self, workspace: &WorkspaceId, tool_call_id: &str, answers: Vec<Answer>) -> bool {
        if let Some((_, tx)) = self.pending.remove(&(workspace.clone(), tool_call_id.to_string())) {
            tx.send(answers).is_ok()
        } else {
            false
        }
    }

    /// Blocks until answers are submitted or `abort` fires. If
    /// `prefilled_answers` is `Some`, the prompt never registers and
    /// resolves immediately — the replay-with-known-answers short circuit.
    pub async fn ask(
        &self,
        workspace: &WorkspaceId,
        tool_call_id: &str,
        questions: Vec<Question>,
        prefilled_answers: Option<Vec<Answer>>,
        abort: AbortSignal,
    ) -> ToolOutcome {
        if let Some(answers) = prefilled_answers {
            return answers_to_outcome(&questions, answers);
        }

        let (tx, rx) = oneshot::channel();
        let key = (workspace.clone(), tool_call_id.to_string());
        self.pending.insert(key.clone(), tx);

        tokio::select! {
            result = rx => {
                self.pending.remove(&key);
                match result {
                    Ok(answers) => answers_to_outcome(&questions, answers),
                    Err(_) => ToolOutcome::err("question was cancelled before an answer arrived"),
                }
            }
            _ = abort.cancelled() => {
                self.pending.remove(&key);
                ToolOutcome::err("turn aborted while waiting for an answer")
            }
        }
    }
}

fn answers_to_outcome(questions: &[Question], answers: Vec<Answer>) -> ToolOutcome {
    let mut by_id: std::collections::HashMap<&str, &Answer> =
        answers.iter().map(|a| (a.question_id.as_str(), a)).collect();
    let mut out = Vec::new();
    for q in questions {
        let Some(answer) = by_id.remove(q.id.as_str()) else {
            return ToolOutcome::err(format!("no answer provided for question {}", q.id));
        };
        out.push(json!({ "questionId": q.id, "answer": answer.value }));
    }
    ToolOutcome::ok(Value::Array(out))
}
