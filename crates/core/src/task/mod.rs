//! Task Queue (§4.7): priority heap with dependency gating, retry with
//! backoff, and lifecycle events.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub required_capabilities: HashSet<String>,
    pub dependencies: HashSet<TaskId>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: Instant,
    pub queued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        priority: Priority,
        required_capabilities: HashSet<String>,
        dependencies: HashSet<TaskId>,
        max_retries: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            priority,
            required_capabilities,
            dependencies,
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            queued_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// Heap entry ordered by `(priority, queuedAt)`: higher priority first,
/// and within the same priority, earlier `queuedAt` first (FIFO tie-break).
struct HeapEntry {
    priority: Priority,
    queued_at: Instant,
    task_id: TaskId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.queued_at == other.queued_at
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority and earlier queued_at
        // should sort "greater" so they pop first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Enqueued,
    Started,
    Completed,
    Failed,
    Retried,
    Cancelled,
}

struct Inner {
    tasks: HashMap<TaskId, Task>,
    heap: BinaryHeap<HeapEntry>,
    /// Tasks held back until their dependencies complete.
    pending_pool: HashSet<TaskId>,
    events: Vec<(TaskId, TaskEvent)>,
}

pub struct TaskQueue {
    backoff_base: Duration,
    backoff_cap: Duration,
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new(backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            backoff_base,
            backoff_cap,
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                heap: BinaryHeap::new(),
                pending_pool: HashSet::new(),
                events: Vec::new(),
            }),
        }
    }

    fn dependencies_met(tasks: &HashMap<TaskId, Task>, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| matches!(tasks.get(dep), Some(t) if t.status == TaskStatus::Completed))
    }

    pub fn enqueue(&self, mut task: Task) -> TaskId {
        let mut inner = self.inner.lock();
        task.queued_at = Instant::now();
        let id = task.id;

        if Self::dependencies_met(&inner.tasks, &task) {
            task.status = TaskStatus::Queued;
            inner.heap.push(HeapEntry {
                priority: task.priority,
                queued_at: task.queued_at,
                task_id: id,
            });
        } else {
            task.status = TaskStatus::Pending;
            inner.pending_pool.insert(id);
        }
        inner.tasks.insert(id, task);
        inner.events.push((id, TaskEvent::Enqueued));
        id
    }

    /// Returns only tasks with all dependencies completed; never returns
    /// one with an unmet dependency, by construction (the pending pool
    /// holds those back until promoted). A retried task whose backoff
    /// delay hasn't elapsed yet (`queued_at` in the future) is skipped
    /// rather than returned, so exponential backoff actually delays
    /// redelivery instead of being observed only in the stored timestamp.
    pub fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock();
        let mut not_yet_due = Vec::new();
        let result = loop {
            let Some(entry) = inner.heap.pop() else {
                break None;
            };
            let Some(task) = inner.tasks.get(&entry.task_id) else {
                continue;
            };
            if task.status != TaskStatus::Queued {
                continue;
            }
            if !Self::dependencies_met(&inner.tasks, task) {
                // Dependency regressed (shouldn't normally happen); park it.
                inner.pending_pool.insert(entry.task_id);
                continue;
            }
            if entry.queued_at > Instant::now() {
                // Still backed off; keep scanning for anything ready, since
                // priority order doesn't imply due-time order once retries
                // are mixed in, then restore this entry before returning.
                not_yet_due.push(entry);
                continue;
            }
            let mut task = inner.tasks.get_mut(&entry.task_id).unwrap().clone();
            task.status = TaskStatus::Assigned;
            inner.tasks.insert(task.id, task.clone());
            break Some(task);
        };
        for entry in not_yet_due {
            inner.heap.push(entry);
        }
        result
    }

    fn promote_dependents(inner: &mut Inner, completed_id: TaskId) {
        let ready: Vec<TaskId> = inner
            .pending_pool
            .iter()
            .copied()
            .filter(|id| {
                inner.tasks[id].dependencies.contains(&completed_id)
                    && Self::dependencies_met(&inner.tasks, &inner.tasks[id])
            })
            .collect();
        for id in ready {
            inner.pending_pool.remove(&id);
            if let Some(task) = inner.tasks.get_mut(&id) {
                task.status = TaskStatus::Queued;
                task.queued_at = Instant::now();
                inner.heap.push(HeapEntry {
                    priority: task.priority,
                    queued_at: task.queued_at,
                    task_id: id,
                });
            }
        }
    }

    pub fn acknowledge(&self, task_id: TaskId, result: serde_json::Value) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.finished_at = Some(Instant::now());
        }
        inner.events.push((task_id, TaskEvent::Completed));
        Self::promote_dependents(&mut inner, task_id);
    }

    /// On failure with `attempts < maxRetries`, reinserts with exponential
    /// backoff; after `maxRetries`, status becomes `failed` and dependents
    /// cascade to `failed:DependencyCancelled`.
    pub fn fail(&self, task_id: TaskId, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        let error = error.into();
        let should_retry = {
            let Some(task) = inner.tasks.get(&task_id) else {
                return;
            };
            task.attempts < task.max_retries
        };

        if should_retry {
            let attempts = inner.tasks[&task_id].attempts;
            let delay = self.backoff_delay(attempts);
            drop(inner);
            self.retry(task_id, delay);
            let mut inner = self.inner.lock();
            if let Some(task) = inner.tasks.get_mut(&task_id) {
                task.error = Some(error);
            }
            return;
        }

        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.finished_at = Some(Instant::now());
        }
        inner.events.push((task_id, TaskEvent::Failed));
        self.cascade_cancel_dependents(&mut inner, task_id, "DependencyCancelled");
    }

    fn backoff_delay(&self, attempts: u32) -> Duration {
        let scaled = self.backoff_base * 2u32.saturating_pow(attempts);
        scaled.min(self.backoff_cap)
    }

    pub fn retry(&self, task_id: TaskId, delay: Duration) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return;
        };
        task.attempts += 1;
        task.queued_at = Instant::now() + delay;
        task.status = TaskStatus::Queued;
        let (priority, queued_at) = (task.priority, task.queued_at);
        inner.heap.push(HeapEntry {
            priority,
            queued_at,
            task_id,
        });
        inner.events.push((task_id, TaskEvent::Retried));
    }

    pub fn update_priority(&self, task_id: TaskId, new_priority: Priority) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return;
        };
        if task.status != TaskStatus::Queued {
            return;
        }
        task.priority = new_priority;
        let queued_at = task.queued_at;
        // Re-heap: rebuild without the stale entry, since BinaryHeap has no
        // decrease-key; stale entries for this id are filtered in dequeue.
        inner.heap.retain(|e| e.task_id != task_id);
        inner.heap.push(HeapEntry {
            priority: new_priority,
            queued_at,
            task_id,
        });
    }

    pub fn cancel(&self, task_id: TaskId) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Cancelled;
            task.finished_at = Some(Instant::now());
        }
        inner.events.push((task_id, TaskEvent::Cancelled));
        self.cascade_cancel_dependents(&mut inner, task_id, "DependencyCancelled");
    }

    fn cascade_cancel_dependents(&self, inner: &mut Inner, ancestor: TaskId, reason: &str) {
        let dependents: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| {
                t.dependencies.contains(&ancestor)
                    && !matches!(
                        t.status,
                        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
                    )
            })
            .map(|t| t.id)
            .collect();

        for dep_id in dependents {
            inner.pending_pool.remove(&dep_id);
            inner.heap.retain(|e| e.task_id != dep_id);
            if let Some(task) = inner.tasks.get_mut(&dep_id) {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.to_string());
                task.finished_at = Some(Instant::now());
            }
            inner.events.push((dep_id, TaskEvent::Failed));
            self.cascade_cancel_dependents(inner, dep_id, reason);
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.inner.lock().tasks.get(&task_id).cloned()
    }

    pub fn drain_events(&self) -> Vec<(TaskId, TaskEvent)> {
        std::mem::take(&mut self.inner.lock().events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: Priority, deps: HashSet<TaskId>) -> Task {
        Task::new("t", priority, HashSet::new(), deps, 3)
    }

    #[test]
    fn dependency_ordering_matches_scenario_four() {
        let queue = TaskQueue::new(Duration::from_millis(10), Duration::from_secs(60));
        let t1 = task(Priority::Medium, HashSet::new());
        let t1_id = t1.id;
        queue.enqueue(t1);

        let t2 = task(Priority::Medium, [t1_id].into_iter().collect());
        let t2_id = t2.id;
        queue.enqueue(t2);

        let t3 = task(Priority::Medium, [t2_id].into_iter().collect());
        queue.enqueue(t3);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.id, t1_id);
        assert!(queue.dequeue().is_none());

        queue.acknowledge(t1_id, serde_json::json!(null));
        let second = queue.dequeue().unwrap();
        assert_eq!(second.id, t2_id);
    }

    #[test]
    fn priority_preemption_matches_scenario_five() {
        let queue = TaskQueue::new(Duration::from_millis(10), Duration::from_secs(60));
        let low = task(Priority::Low, HashSet::new());
        let med = task(Priority::Medium, HashSet::new());
        let high = task(Priority::High, HashSet::new());
        queue.enqueue(low);
        queue.enqueue(med);
        queue.enqueue(high);
        let urgent = task(Priority::Urgent, HashSet::new());
        queue.enqueue(urgent);

        assert_eq!(queue.dequeue().unwrap().priority, Priority::Urgent);
        assert_eq!(queue.dequeue().unwrap().priority, Priority::High);
        assert_eq!(queue.dequeue().unwrap().priority, Priority::Medium);
        assert_eq!(queue.dequeue().unwrap().priority, Priority::Low);
    }

    #[test]
    fn cancelling_cascades_to_queued_dependents() {
        let queue = TaskQueue::new(Duration::from_millis(10), Duration::from_secs(60));
        let parent = task(Priority::Medium, HashSet::new());
        let parent_id = parent.id;
        queue.enqueue(parent);
        let child = task(Priority::Medium, [parent_id].into_iter().collect());
        let child_id = child.id;
        queue.enqueue(child);

        queue.cancel(parent_id);
        let child_state = queue.get(child_id).unwrap();
        assert_eq!(child_state.status, TaskStatus::Failed);
        assert_eq!(child_state.error.as_deref(), Some("DependencyCancelled"));
    }

    #[test]
    fn backed_off_retry_is_not_redelivered_before_its_delay_elapses() {
        let queue = TaskQueue::new(Duration::from_millis(50), Duration::from_secs(60));
        let t = task(Priority::Medium, HashSet::new());
        let id = t.id;
        queue.enqueue(t);
        queue.dequeue().unwrap();
        queue.fail(id, "boom");

        // Backoff for attempt 0 is 50ms; immediately after `fail` it must
        // not be redeliverable yet, even though it's the only queued task.
        assert!(queue.dequeue().is_none());

        std::thread::sleep(Duration::from_millis(60));
        let redelivered = queue.dequeue().unwrap();
        assert_eq!(redelivered.id, id);
    }
}
