//! The `Core` holder (§9 "Global mutable state"): centralizes every
//! component's shared state behind one struct constructed at startup, so
//! tests get an isolated instance instead of reaching for process-wide
//! singletons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentRegistry;
use crate::balancer::{AdaptiveWeights, Algorithm, LoadBalancer};
use crate::cache::CacheManager;
use crate::circuit_breaker::CircuitBreakers;
use crate::config::ConfigOptions;
use crate::coordinator::Coordinator;
use crate::dispatcher::{Dispatcher, UpstreamInvoker};
use crate::error::{CoreError, CoreResult};
use crate::monitor::PerformanceMonitor;
use crate::rate_limiter::RateLimiter;
use crate::task::TaskQueue;
use crate::tool::{FilterSpec, ToolDescriptor, ToolRegistry};

pub struct Core {
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheManager>,
    pub breakers: Arc<CircuitBreakers>,
    pub agents: Arc<AgentRegistry>,
    pub tasks: Arc<TaskQueue>,
    pub balancer: Arc<LoadBalancer>,
    pub monitor: Arc<PerformanceMonitor>,
    pub coordinator: Arc<Coordinator>,
}

impl Core {
    /// Initialization failures (missing credentials, empty active set) are
    /// fatal and surfaced here, per §7's propagation policy.
    pub fn new(
        config: &ConfigOptions,
        declared_tools: Vec<ToolDescriptor>,
        invoker: Arc<dyn UpstreamInvoker>,
    ) -> CoreResult<Self> {
        if config.app_id.is_empty() || config.app_secret.is_empty() {
            return Err(CoreError::Authentication(
                "appId and appSecret are required".to_string(),
            ));
        }

        let filter = config.tools.clone().unwrap_or_else(|| {
            FilterSpec::new(vec![crate::tool::Selector::All])
        });
        let registry = Arc::new(
            ToolRegistry::builder()
                .declare_all(declared_tools)
                .finalize(&filter)?,
        );

        let mut tiers = HashMap::new();
        for (name, settings) in &config.rate_limiting.tiers {
            tiers.insert(name.clone(), (*settings).into());
        }
        let rate_limiter = Arc::new(RateLimiter::new(tiers));

        let cache = Arc::new(CacheManager::new(config.cache.max_entries));

        let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker.default.into()));
        for (tool, settings) in &config.circuit_breaker.per_tool {
            breakers.configure_tool(tool, (*settings).into());
        }

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            breakers.clone(),
            rate_limiter.clone(),
            cache.clone(),
            invoker,
            config.user_access_token.is_some(),
        ));

        let agents = Arc::new(AgentRegistry::new(Duration::from_secs(30)));
        let tasks = Arc::new(TaskQueue::new(Duration::from_secs(1), Duration::from_secs(300)));
        let balancer = Arc::new(LoadBalancer::new(Algorithm::Adaptive, AdaptiveWeights::default()));
        let monitor = Arc::new(PerformanceMonitor::new(Duration::from_secs(3600)));
        let coordinator = Arc::new(Coordinator::new(tasks.clone()));

        Ok(Self {
            registry,
            dispatcher,
            rate_limiter,
            cache,
            breakers,
            agents,
            tasks,
            balancer,
            monitor,
            coordinator,
        })
    }
}
