//! Known agents and their base/visibility, consulted by `switch_agent`.
//! Grounded on `core/src/agent_registry.rs`'s role in the teacher.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    /// `exec`, `plan`, `explore`, or a custom base a user-defined agent
    /// extends.
    pub base: String,
    pub hidden: bool,
    pub disabled: bool,
    pub model: Option<String>,
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        let mut agents = HashMap::new();
        for base in ["exec", "plan", "explore"] {
            agents.insert(
                base.to_string(),
                AgentDefinition {
                    id: base.to_string(),
                    base: base.to_string(),
                    hidden: false,
                    disabled: false,
                    model: None,
                    thinking: None,
                },
            );
        }
        Self { agents }
    }

    pub fn insert(&mut self, agent: AgentDefinition) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    /// Usable: exists, not hidden, not disabled.
    pub fn is_usable(&self, id: &str) -> bool {
        self.agents
            .get(id)
            .map(|a| !a.hidden && !a.disabled)
            .unwrap_or(false)
    }

    /// Whether `id`'s chain of bases reaches `exec` — used by the
    /// hard-restart predicate in spec.md §4.5.1.
    pub fn resolves_to_exec(&self, id: &str) -> bool {
        let mut current = id.to_string();
        let mut seen = std::collections::HashSet::new();
        loop {
            if current == "exec" {
                return true;
            }
            if !seen.insert(current.clone()) {
                return false;
            }
            match self.agents.get(&current) {
                Some(def) if def.base != current => current = def.base.clone(),
                _ => return false,
            }
        }
    }
}
