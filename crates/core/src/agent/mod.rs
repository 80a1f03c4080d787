//! Agent Registry (§4.6): the set of live agents available to run tasks.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

pub type AgentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: HashSet<String>,
    pub status: AgentStatus,
    pub current_tasks: u32,
    pub max_concurrent_tasks: u32,
    pub last_heartbeat: Instant,
    pub version: String,
}

impl AgentRecord {
    pub fn new(
        agent_type: impl Into<String>,
        capabilities: HashSet<String>,
        max_concurrent_tasks: u32,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            capabilities,
            status: AgentStatus::Idle,
            current_tasks: 0,
            max_concurrent_tasks,
            last_heartbeat: Instant::now(),
            version: version.into(),
        }
    }

    pub fn load_fraction(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            1.0
        } else {
            self.current_tasks as f64 / self.max_concurrent_tasks as f64
        }
    }

    fn is_stale(&self, heartbeat_timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() > heartbeat_timeout
    }
}

pub struct AgentRegistry {
    heartbeat_timeout: Duration,
    agents: Mutex<HashMap<AgentId, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, record: AgentRecord) -> AgentId {
        let id = record.id;
        self.agents.lock().insert(id, record);
        id
    }

    pub fn unregister(&self, id: AgentId) -> Option<AgentRecord> {
        self.agents.lock().remove(&id)
    }

    pub fn heartbeat(&self, id: AgentId) -> bool {
        let mut agents = self.agents.lock();
        match agents.get_mut(&id) {
            Some(agent) => {
                agent.last_heartbeat = Instant::now();
                if agent.status == AgentStatus::Offline {
                    agent.status = AgentStatus::Idle;
                }
                true
            }
            None => false,
        }
    }

    /// Marks agents offline whose last heartbeat exceeds the timeout.
    /// Expected to be invoked on a periodic tick (§4.6).
    pub fn sweep_stale(&self) -> Vec<AgentId> {
        let mut agents = self.agents.lock();
        let mut went_offline = Vec::new();
        for (id, agent) in agents.iter_mut() {
            if agent.status != AgentStatus::Offline && agent.is_stale(self.heartbeat_timeout) {
                agent.status = AgentStatus::Offline;
                went_offline.push(*id);
            }
        }
        went_offline
    }

    pub fn find_by_capability(&self, cap_names: &[String], require_all: bool) -> Vec<AgentRecord> {
        self.agents
            .lock()
            .values()
            .filter(|a| {
                if a.status == AgentStatus::Offline {
                    return false;
                }
                if require_all {
                    cap_names.iter().all(|c| a.capabilities.contains(c))
                } else {
                    cap_names.iter().any(|c| a.capabilities.contains(c))
                }
            })
            .cloned()
            .collect()
    }

    /// Offline agents are never returned.
    pub fn find_available(&self, max_load: f64) -> Vec<AgentRecord> {
        self.agents
            .lock()
            .values()
            .filter(|a| a.status != AgentStatus::Offline && a.load_fraction() <= max_load)
            .cloned()
            .collect()
    }

    pub fn list_stats(&self) -> Vec<AgentRecord> {
        self.agents.lock().values().cloned().collect()
    }

    pub fn get(&self, id: AgentId) -> Option<AgentRecord> {
        self.agents.lock().get(&id).cloned()
    }

    /// Invoked by the Load Balancer when it assigns or releases a task.
    pub fn adjust_load(&self, id: AgentId, delta: i32) {
        let mut agents = self.agents.lock();
        if let Some(agent) = agents.get_mut(&id) {
            agent.current_tasks = (agent.current_tasks as i32 + delta).max(0) as u32;
            agent.status = if agent.current_tasks > 0 {
                AgentStatus::Busy
            } else if agent.status != AgentStatus::Offline {
                AgentStatus::Idle
            } else {
                agent.status
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_heartbeat_marks_offline_and_excludes_from_available() {
        let registry = AgentRegistry::new(Duration::from_millis(0));
        let mut record = AgentRecord::new("worker", HashSet::new(), 4, "1.0");
        record.last_heartbeat = Instant::now() - Duration::from_secs(10);
        let id = registry.register(record);

        let offline = registry.sweep_stale();
        assert_eq!(offline, vec![id]);
        assert!(registry.find_available(1.0).is_empty());
    }

    #[test]
    fn capability_filter_requires_all_when_asked() {
        let registry = AgentRegistry::new(Duration::from_secs(30));
        let caps: HashSet<String> = ["base".into(), "messaging".into()].into_iter().collect();
        let id = registry.register(AgentRecord::new("worker", caps, 4, "1.0"));

        let found = registry.find_by_capability(&["base".into(), "messaging".into()], true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        let not_found = registry.find_by_capability(&["base".into(), "admin".into()], true);
        assert!(not_found.is_empty());
    }
}
