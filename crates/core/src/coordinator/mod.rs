//! Coordinator Agent (§4.10): decomposes a free-form instruction into tasks
//! by keyword/category classification and tracks their status.
//!
//! The Coordinator is an agent like any other (§4.10); no other component
//! depends on its internals, so it is built entirely on top of the public
//! [`TaskQueue`] API.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::task::{Priority, Task, TaskId, TaskQueue, TaskStatus};

pub type CorrelationId = Uuid;

/// A single keyword → category rule used for the simple classification
/// §4.10 calls for ("no external service required for the core spec").
struct ClassificationRule {
    keywords: Vec<&'static str>,
    capability: &'static str,
    priority: Priority,
}

fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule {
            keywords: vec!["urgent", "asap", "immediately"],
            capability: "base",
            priority: Priority::Urgent,
        },
        ClassificationRule {
            keywords: vec!["message", "notify", "send"],
            capability: "messaging",
            priority: Priority::High,
        },
        ClassificationRule {
            keywords: vec!["report", "summary", "analyze"],
            capability: "analytics",
            priority: Priority::Medium,
        },
    ]
}

pub struct CoordinatorStatus {
    pub correlation_id: CorrelationId,
    pub task_ids: Vec<TaskId>,
    pub statuses: HashMap<TaskId, TaskStatus>,
}

pub struct Coordinator {
    queue: Arc<TaskQueue>,
    rules: Vec<ClassificationRule>,
    correlations: parking_lot::Mutex<HashMap<CorrelationId, Vec<TaskId>>>,
}

impl Coordinator {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            rules: default_rules(),
            correlations: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Splits `instruction` into individual sentences/clauses, classifies
    /// each by keyword match, and submits one task per clause in order
    /// (each depending on the previous, so steps run sequentially unless
    /// the instruction is a single clause).
    pub fn submit(&self, instruction: &str) -> CorrelationId {
        let clauses: Vec<&str> = instruction
            .split(['.', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut task_ids = Vec::new();
        let mut previous: Option<TaskId> = None;

        for clause in clauses {
            let lower = clause.to_lowercase();
            let rule = self
                .rules
                .iter()
                .find(|r| r.keywords.iter().any(|kw| lower.contains(kw)));

            let (priority, capability) = match rule {
                Some(r) => (r.priority, r.capability),
                None => (Priority::Low, "base"),
            };

            let mut required_capabilities = HashSet::new();
            required_capabilities.insert(capability.to_string());
            let dependencies = previous.into_iter().collect();

            let task = Task::new(clause, priority, required_capabilities, dependencies, 3);
            let id = task.id;
            self.queue.enqueue(task);
            task_ids.push(id);
            previous = Some(id);
        }

        let correlation_id = Uuid::new_v4();
        self.correlations.lock().insert(correlation_id, task_ids);
        correlation_id
    }

    /// Compiles a status object from observed task events.
    pub fn status(&self, correlation_id: CorrelationId) -> Option<CoordinatorStatus> {
        let task_ids = self.correlations.lock().get(&correlation_id)?.clone();
        let statuses = task_ids
            .iter()
            .filter_map(|id| self.queue.get(*id).map(|t| (*id, t.status)))
            .collect();
        Some(CoordinatorStatus {
            correlation_id,
            task_ids,
            statuses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn decomposes_into_sequential_dependent_tasks() {
        let queue = Arc::new(TaskQueue::new(Duration::from_millis(10), Duration::from_secs(60)));
        let coordinator = Coordinator::new(queue.clone());

        let correlation = coordinator.submit("Send a message to the team. Analyze the report");
        let status = coordinator.status(correlation).unwrap();
        assert_eq!(status.task_ids.len(), 2);

        let first = queue.get(status.task_ids[0]).unwrap();
        assert_eq!(first.priority, Priority::High);
        assert!(first.dependencies.is_empty());

        let second = queue.get(status.task_ids[1]).unwrap();
        assert_eq!(second.priority, Priority::Medium);
        assert!(second.dependencies.contains(&status.task_ids[0]));
    }
}
