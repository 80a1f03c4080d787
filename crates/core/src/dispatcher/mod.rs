//! Tool Dispatcher (§4.2): the ordered nine-step `call` pipeline.

pub mod invoker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{CacheManager, Category};
use crate::circuit_breaker::{AdmissionDecision, CircuitBreakers};
use crate::error::{CoreError, CoreResult, FieldDiagnostic};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::tool::{AuthMode, ToolRegistry};

pub use invoker::{Content, InvocationResult, UpstreamInvoker};

fn category_for(classification_tag: &str) -> Option<Category> {
    match classification_tag {
        "UserInfo" => Some(Category::UserInfo),
        "ChatInfo" => Some(Category::ChatInfo),
        "Departments" => Some(Category::Departments),
        "AppTokens" => Some(Category::AppTokens),
        "UserTokens" => Some(Category::UserTokens),
        "BaseMetadata" => Some(Category::BaseMetadata),
        "CalendarData" => Some(Category::CalendarData),
        _ => Some(Category::GenericApi),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenModePreference {
    #[default]
    Auto,
    Tenant,
    User,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub token_mode: Option<TokenModePreference>,
    pub timeout: Option<Duration>,
    pub no_cache: bool,
    pub cache_category: Option<String>,
    pub max_wait: Option<Duration>,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakers>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<CacheManager>,
    invoker: Arc<dyn UpstreamInvoker>,
    user_token_available: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breakers: Arc<CircuitBreakers>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<CacheManager>,
        invoker: Arc<dyn UpstreamInvoker>,
        user_token_available: bool,
    ) -> Self {
        Self {
            registry,
            breakers,
            rate_limiter,
            cache,
            invoker,
            user_token_available,
        }
    }

    pub fn list(&self) -> Vec<serde_json::Value> {
        self.registry
            .list()
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect()
    }

    fn select_auth_mode(&self, supported: &[AuthMode], preference: TokenModePreference) -> AuthMode {
        match preference {
            TokenModePreference::Tenant => AuthMode::Tenant,
            TokenModePreference::User => AuthMode::User,
            TokenModePreference::Auto => {
                if self.user_token_available
                    && (supported.contains(&AuthMode::User) || supported.contains(&AuthMode::Either))
                {
                    AuthMode::User
                } else {
                    AuthMode::Tenant
                }
            }
        }
    }

    fn validate_args(schema: &Value, args: &Value) -> Result<(), Vec<FieldDiagnostic>> {
        let validator = match jsonschema::validator_for(schema) {
            Ok(v) => v,
            Err(e) => {
                return Err(vec![FieldDiagnostic {
                    field: "$schema".to_string(),
                    message: e.to_string(),
                }]);
            }
        };
        let errors: Vec<FieldDiagnostic> = validator
            .iter_errors(args)
            .map(|e| FieldDiagnostic {
                field: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn canonicalize(args: &Value) -> String {
        // BTreeMap-backed serialization of a sorted object gives a stable
        // string regardless of the caller's field order.
        fn sort(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let sorted: std::collections::BTreeMap<_, _> =
                        map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                    serde_json::to_value(sorted).unwrap()
                }
                Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
                other => other.clone(),
            }
        }
        sort(args).to_string()
    }

    /// `call(name, args, options)` — the ordered nine-step pipeline.
    #[instrument(skip(self, args, options), fields(tool = name))]
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        options: CallOptions,
    ) -> CoreResult<InvocationResult> {
        // 1. Name resolution.
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("tool `{name}` not found")))?
            .clone();

        // 2. Input validation.
        if let Err(diagnostics) = Self::validate_args(&descriptor.input_schema, &args) {
            return Err(CoreError::Validation(diagnostics));
        }

        // 3. Auth selection.
        let preference = options.token_mode.unwrap_or(TokenModePreference::Auto);
        let auth_mode = self.select_auth_mode(&descriptor.auth_modes, preference);
        if !descriptor.supports(auth_mode) {
            return Err(CoreError::Validation(vec![FieldDiagnostic {
                field: "options.tokenMode".to_string(),
                message: format!("tool `{name}` does not support the requested auth mode"),
            }]));
        }

        // 4. Circuit-breaker admission.
        if self.breakers.try_admit(name) == AdmissionDecision::Refuse {
            return Err(CoreError::CircuitOpen {
                tool: name.to_string(),
            });
        }

        // 5. Rate-limit admission.
        let tier = descriptor.classification.tier_name();
        let max_wait = options.max_wait.unwrap_or(Duration::ZERO);
        if self.rate_limiter.acquire(tier, 1.0, max_wait).await == Admission::Throttled {
            self.breakers.record_failure(name);
            return Err(CoreError::RateLimit);
        }

        let canonical_args = Self::canonicalize(&args);
        let cache_eligible = descriptor.classification.is_cache_eligible();
        let category_tag = options
            .cache_category
            .clone()
            .unwrap_or_else(|| "GenericApi".to_string());
        let cache_category = category_for(&category_tag).unwrap_or(Category::GenericApi);
        let cache_key = format!("{category_tag}:{name}:{canonical_args}");

        // 6. Cache check (read-classified tools only).
        if cache_eligible && !options.no_cache {
            if let Some(value) = self.cache.get(cache_category, &cache_key).await {
                debug!(tool = name, "cache hit, short-circuiting upstream call");
                self.breakers.record_success(name, Duration::ZERO);
                return Ok(serde_json::from_value(value).map_err(|e| {
                    CoreError::wrap_unknown(format!("corrupt cache entry: {e}"))
                })?);
            }
        }

        // 7. Upstream invocation.
        let timeout = options.timeout.unwrap_or(Duration::from_secs(30));
        let started = Instant::now();
        let invocation = tokio::time::timeout(
            timeout,
            self.invoker
                .invoke(&descriptor.binding, auth_mode, &args, timeout),
        )
        .await;

        // 8. Result shaping.
        let result = match invocation {
            Ok(Ok(result)) => {
                self.breakers.record_success(name, started.elapsed());
                Ok(result)
            }
            Ok(Err(err)) => {
                self.breakers.record_failure(name);
                Err(err)
            }
            Err(_) => {
                self.breakers.record_failure(name);
                Err(CoreError::Timeout)
            }
        };

        // 9. Telemetry & cache write.
        if let Ok(ref invocation_result) = result {
            if cache_eligible && !options.no_cache {
                if let Ok(value) = serde_json::to_value(invocation_result) {
                    self.cache.set(cache_category, &cache_key, value, None).await;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use crate::tool::{Classification, Selector, ToolDescriptor, ToolRegistry, UpstreamBinding};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingInvoker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl UpstreamInvoker for CountingInvoker {
        async fn invoke(
            &self,
            _binding: &crate::tool::UpstreamBinding,
            _auth_mode: AuthMode,
            _args: &Value,
            _timeout: Duration,
        ) -> CoreResult<InvocationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InvocationResult {
                content: vec![Content::Json {
                    json: serde_json::json!({"name": "A"}),
                }],
                metadata: serde_json::json!({}),
            })
        }
    }

    fn user_get_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "user.get".to_string(),
            description: "fetch a user".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "user_id": { "type": "string" } },
                "required": ["user_id"]
            }),
            classification: Classification::Read,
            auth_modes: vec![AuthMode::Tenant],
            binding: UpstreamBinding::opaque("user.get"),
        }
    }

    fn setup(invoker: Arc<CountingInvoker>) -> Dispatcher {
        let registry = Arc::new(
            ToolRegistry::builder()
                .declare(user_get_descriptor())
                .finalize(&crate::tool::FilterSpec::new(vec![Selector::All]))
                .unwrap(),
        );
        let breakers = Arc::new(CircuitBreakers::new(BreakerConfig::default()));
        let mut tiers = HashMap::new();
        tiers.insert(
            "read".to_string(),
            crate::rate_limiter::TierConfig::new(200.0, 100.0, 60_000),
        );
        let rate_limiter = Arc::new(RateLimiter::new(tiers));
        let cache = Arc::new(CacheManager::new(1000));
        Dispatcher::new(registry, breakers, rate_limiter, cache, invoker, false)
    }

    #[tokio::test]
    async fn scenario_one_read_cache_hit() {
        let invoker = Arc::new(CountingInvoker {
            calls: AtomicU32::new(0),
        });
        let dispatcher = setup(invoker.clone());

        let args = serde_json::json!({"user_id": "u1"});
        let first = dispatcher
            .call("user.get", args.clone(), CallOptions::default())
            .await
            .unwrap();
        let second = dispatcher
            .call("user.get", args, CallOptions::default())
            .await
            .unwrap();

        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        match (&first.content[0], &second.content[0]) {
            (Content::Json { json: a }, Content::Json { json: b }) => assert_eq!(a, b),
            _ => panic!("expected json content"),
        }
    }

    #[tokio::test]
    async fn missing_required_field_fails_validation_without_upstream_call() {
        let invoker = Arc::new(CountingInvoker {
            calls: AtomicU32::new(0),
        });
        let dispatcher = setup(invoker.clone());

        let err = dispatcher
            .call("user.get", serde_json::json!({}), CallOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let invoker = Arc::new(CountingInvoker {
            calls: AtomicU32::new(0),
        });
        let dispatcher = setup(invoker);
        let err = dispatcher
            .call("user.delete", serde_json::json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotFound);
    }
}
