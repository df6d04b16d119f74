use serde::{Deserialize, Serialize};

/// `Cancelled` is an (expansion) addition grounded on
/// `codex_protocol::write_todos::TodoStatus`; the ordering invariant from
/// spec.md only constrains `completed -> in_progress -> pending`, so
/// cancelled items are excluded from that check the same way the teacher's
/// `validate_todos` only counts `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Completed,
    InProgress,
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

pub const MAX_TODOS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoValidationError {
    TooManyItems { max: usize, got: usize },
    EmptyContent { index: usize },
    MultipleInProgress,
    OutOfOrder { index: usize },
}

impl std::fmt::Display for TodoValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyItems { max, got } => {
                write!(f, "at most {max} todos are allowed, got {got}")
            }
            Self::EmptyContent { index } => write!(f, "todo at index {index} has empty content"),
            Self::MultipleInProgress => {
                write!(f, "only one todo can be in_progress at a time")
            }
            Self::OutOfOrder { index } => write!(
                f,
                "todo at index {index} breaks the completed -> in_progress -> pending ordering"
            ),
        }
    }
}

impl std::error::Error for TodoValidationError {}

fn rank(status: TodoStatus) -> u8 {
    match status {
        TodoStatus::Completed => 0,
        TodoStatus::InProgress => 1,
        TodoStatus::Pending => 2,
        // Cancelled items are not part of the ordering constraint.
        TodoStatus::Cancelled => 1,
    }
}

/// Validates the full invariants from spec.md §4.6 / §3:
/// at most `MAX_TODOS`, non-empty content, `completed -> in_progress ->
/// pending` top-to-bottom (multiple `in_progress` allowed; cancelled items
/// are ignored by the ordering check).
pub fn validate_todos(todos: &[TodoItem]) -> Result<(), TodoValidationError> {
    if todos.len() > MAX_TODOS {
        return Err(TodoValidationError::TooManyItems {
            max: MAX_TODOS,
            got: todos.len(),
        });
    }
    for (idx, todo) in todos.iter().enumerate() {
        if todo.content.trim().is_empty() {
            return Err(TodoValidationError::EmptyContent { index: idx });
        }
    }

    let ordered: Vec<_> = todos
        .iter()
        .filter(|t| t.status != TodoStatus::Cancelled)
        .collect();

    let mut max_rank_seen = 0u8;
    for (idx, todo) in ordered.iter().enumerate() {
        let r = rank(todo.status);
        if r < max_rank_seen {
            return Err(TodoValidationError::OutOfOrder { index: idx });
        }
        max_rank_seen = max_rank_seen.max(r);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str, status: TodoStatus) -> TodoItem {
        TodoItem {
            content: content.to_string(),
            status,
        }
    }

    #[test]
    fn accepts_well_ordered_list() {
        let todos = vec![
            item("a", TodoStatus::Completed),
            item("b", TodoStatus::InProgress),
            item("c", TodoStatus::Pending),
        ];
        assert!(validate_todos(&todos).is_ok());
    }

    #[test]
    fn rejects_pending_before_in_progress() {
        let todos = vec![
            item("a", TodoStatus::Pending),
            item("b", TodoStatus::InProgress),
        ];
        assert!(matches!(
            validate_todos(&todos),
            Err(TodoValidationError::OutOfOrder { index: 1 })
        ));
    }

    #[test]
    fn allows_multiple_in_progress() {
        let todos = vec![
            item("a", TodoStatus::InProgress),
            item("b", TodoStatus::InProgress),
        ];
        assert!(validate_todos(&todos).is_ok());
    }

    #[test]
    fn cancelled_items_do_not_break_ordering() {
        let todos = vec![
            item("a", TodoStatus::Completed),
            item("b", TodoStatus::Cancelled),
            item("c", TodoStatus::InProgress),
            item("d", TodoStatus::Pending),
        ];
        assert!(validate_todos(&todos).is_ok());
    }

    #[test]
    fn rejects_over_cap() {
        let todos: Vec<_> = (0..MAX_TODOS + 1)
            .map(|i| item(&format!("t{i}"), TodoStatus::Pending))
            .collect();
        assert!(matches!(
            validate_todos(&todos),
            Err(TodoValidationError::TooManyItems { .. })
        ));
    }
}
