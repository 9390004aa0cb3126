use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::access::Principal;
use crate::domain::tool::ExecutionResult;
use crate::pipeline::ToolExecutor;
use crate::registry::ToolRegistry;

pub const CACHE_KEY_PREFIX: &str = "tool_result";
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Slot count at which `set` sweeps expired entries before inserting.
pub const PURGE_THRESHOLD: usize = 1024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cached payload could not be decoded: {0}")]
    Decode(String),
}

/// Key-value store behind the result cache. Backends that cannot enumerate
/// keys keep the default `delete_prefix`, which clears nothing.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
        Ok(0)
    }
}

struct CacheSlot {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCacheBackend {
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheSlot>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Live entries only.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|slot| slot.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired slot and returns how many were freed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.expires_at > now);
        before - slots.len()
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut slots = self.lock();
        match slots.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut slots = self.lock();
        if slots.len() >= PURGE_THRESHOLD {
            slots.retain(|_, slot| slot.expires_at > now);
        }
        slots.insert(key.to_owned(), CacheSlot { value, expires_at: now + ttl });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock().remove(key);
        Ok(())
    }

    /// Counts live entries only; expired slots under the prefix are dropped
    /// without being reported.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut removed = 0;
        self.lock().retain(|key, slot| {
            if !key.starts_with(prefix) {
                return true;
            }
            if slot.expires_at > now {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }
}

/// Permanent miss. Used when caching is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCacheBackend;

impl CacheBackend for NullCacheBackend {
    fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Typed view over a [`CacheBackend`]. Backend failures are logged and read
/// as misses.
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self { backend, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// `tool_result:<tool>:<blake3 of key-sorted JSON args>`.
    pub fn key(tool_name: &str, args: &Map<String, Value>) -> String {
        let canonical = canonical_json(&Value::Object(args.clone()));
        let digest = blake3::hash(canonical.as_bytes());
        format!("{CACHE_KEY_PREFIX}:{tool_name}:{}", digest.to_hex())
    }

    fn tool_prefix(tool_name: &str) -> String {
        format!("{CACHE_KEY_PREFIX}:{tool_name}:")
    }

    pub fn get(&self, tool_name: &str, args: &Map<String, Value>) -> Option<ExecutionResult> {
        let key = Self::key(tool_name, args);
        let stored = match self.backend.get(&key) {
            Ok(stored) => stored?,
            Err(error) => {
                warn!(event_name = "dispatch.cache.read_failed", tool_name, error = %error, "cache read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_value::<ExecutionResult>(stored) {
            Ok(mut result) => {
                result.cached = true;
                Some(result)
            }
            Err(error) => {
                let error = CacheError::Decode(error.to_string());
                warn!(event_name = "dispatch.cache.decode_failed", tool_name, error = %error, "dropping undecodable cache entry");
                if let Err(error) = self.backend.delete(&key) {
                    warn!(event_name = "dispatch.cache.delete_failed", tool_name, error = %error, "cache delete failed");
                }
                None
            }
        }
    }

    /// Stores only successful results that carry data.
    pub fn put(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        result: &ExecutionResult,
        ttl: Option<Duration>,
    ) -> bool {
        if !result.success || result.data.as_ref().map_or(true, Value::is_null) {
            return false;
        }

        let mut stored = result.clone();
        stored.cached = false;
        let payload = match serde_json::to_value(&stored) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(event_name = "dispatch.cache.encode_failed", tool_name, error = %error, "result not cached");
                return false;
            }
        };

        let key = Self::key(tool_name, args);
        match self.backend.set(&key, payload, ttl.unwrap_or(self.default_ttl)) {
            Ok(()) => true,
            Err(error) => {
                warn!(event_name = "dispatch.cache.write_failed", tool_name, error = %error, "cache write failed");
                false
            }
        }
    }

    pub fn invalidate(&self, tool_name: &str, args: &Map<String, Value>) {
        if let Err(error) = self.backend.delete(&Self::key(tool_name, args)) {
            warn!(event_name = "dispatch.cache.delete_failed", tool_name, error = %error, "cache invalidation failed");
        }
    }

    /// Best effort: returns how many entries the backend removed.
    pub fn clear_tool(&self, tool_name: &str) -> usize {
        match self.backend.delete_prefix(&Self::tool_prefix(tool_name)) {
            Ok(removed) => removed,
            Err(error) => {
                warn!(event_name = "dispatch.cache.clear_failed", tool_name, error = %error, "bulk clear failed");
                0
            }
        }
    }
}

/// Deterministic JSON text with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (position, key) in keys.into_iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (position, item) in items.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Memoizes low-risk, cacheable tools in front of another executor. Other
/// contracts pass straight through.
pub struct CachedPipeline {
    inner: Arc<dyn ToolExecutor>,
    registry: Arc<ToolRegistry>,
    cache: ResultCache,
}

impl CachedPipeline {
    pub fn new(inner: Arc<dyn ToolExecutor>, registry: Arc<ToolRegistry>, cache: ResultCache) -> Self {
        Self { inner, registry, cache }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn execute_with_ttl(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> ExecutionResult {
        let eligible = self
            .registry
            .contract(tool_name)
            .filter(|contract| contract.is_cache_eligible())
            .filter(|contract| !contract.requires_approval || principal.privileged)
            .map(|contract| self.registry.permits(principal, contract));

        // Unknown, ineligible, forbidden or approval-gated calls go through
        // the full gate sequence.
        if eligible != Some(true) {
            return self.inner.execute(tool_name, principal, args).await;
        }

        if let Some(hit) = self.cache.get(tool_name, &args) {
            debug!(event_name = "dispatch.cache.hit", tool_name, principal_id = %principal.id, "served from cache");
            return hit;
        }

        let result = self.inner.execute(tool_name, principal, args.clone()).await;
        if self.cache.put(tool_name, &args, &result, ttl) {
            debug!(event_name = "dispatch.cache.stored", tool_name, "result cached");
        }
        result
    }
}

#[async_trait]
impl ToolExecutor for CachedPipeline {
    async fn execute(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult {
        self.execute_with_ttl(tool_name, principal, args, None).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Map, Value};

    use crate::access::{Principal, StaticPermissions};
    use crate::audit::InMemoryAuditSink;
    use crate::cache::{
        canonical_json, CacheBackend, CacheError, CachedPipeline, InMemoryCacheBackend,
        NullCacheBackend, ResultCache, DEFAULT_TTL, PURGE_THRESHOLD,
    };
    use crate::domain::tool::{ExecutionResult, ParamType, ParameterSchema, RiskLevel, ToolContract};
    use crate::monitor::UsageMonitor;
    use crate::pipeline::{ExecutionPipeline, ToolExecutor};
    use crate::registry::{handler_fn, ToolRegistry};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    struct Fixture {
        cached: CachedPipeline,
        backend: Arc<InMemoryCacheBackend>,
        calls: Arc<AtomicUsize>,
    }

    fn counting_tool(
        registry: &mut ToolRegistry,
        contract: ToolContract,
        calls: &Arc<AtomicUsize>,
        data: Option<Value>,
    ) {
        let calls = Arc::clone(calls);
        registry
            .register(
                contract,
                handler_fn(move |_args| {
                    let calls = Arc::clone(&calls);
                    let data = data.clone();
                    async move {
                        let count = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok(ExecutionResult::ok(format!("call {count}"), data))
                    }
                }),
            )
            .expect("register tool");
    }

    fn fixture() -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let permissions = StaticPermissions::new().grant("stock", "inventory:read");
        let mut registry = ToolRegistry::new(Arc::new(permissions));

        counting_tool(
            &mut registry,
            ToolContract::new("check_inventory", "Stock levels")
                .with_parameters(ParameterSchema::new().optional("sku", ParamType::String, "SKU"))
                .with_permission("inventory:read"),
            &calls,
            Some(json!({"on_hand": 42})),
        );
        counting_tool(
            &mut registry,
            ToolContract::new("exchange_rate", "Live FX").with_cacheable(false),
            &calls,
            Some(json!(7.1)),
        );
        counting_tool(
            &mut registry,
            ToolContract::new("create_sales_order", "Create").with_risk(RiskLevel::Medium),
            &calls,
            Some(json!({"order_number": "SO20240001"})),
        );
        counting_tool(&mut registry, ToolContract::new("ping", "No data"), &calls, None);
        counting_tool(
            &mut registry,
            ToolContract::new("export_ledger", "Ledger export").with_approval(),
            &calls,
            Some(json!({"rows": 3})),
        );

        let registry = Arc::new(registry);
        let pipeline = ExecutionPipeline::new(
            Arc::clone(&registry),
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(UsageMonitor::new()),
        );
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = ResultCache::new(backend.clone(), DEFAULT_TTL);
        Fixture { cached: CachedPipeline::new(Arc::new(pipeline), registry, cache), backend, calls }
    }

    #[test]
    fn key_ignores_argument_order() {
        let forward = object(json!({"sku": "LAP-1", "warehouse": "north"}));
        let mut reversed = Map::new();
        reversed.insert("warehouse".to_owned(), json!("north"));
        reversed.insert("sku".to_owned(), json!("LAP-1"));

        let key = ResultCache::key("check_inventory", &forward);
        assert_eq!(key, ResultCache::key("check_inventory", &reversed));
        assert!(key.starts_with("tool_result:check_inventory:"));
        assert_ne!(key, ResultCache::key("search_product", &forward));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":"x","d":[true,null]},"b":1}"#);
    }

    #[tokio::test]
    async fn identical_low_risk_calls_hit_the_handler_once() {
        let fx = fixture();
        let principal = Principal::user("stock");
        let args = object(json!({"sku": "LAP-1"}));

        let first = fx.cached.execute("check_inventory", &principal, args.clone()).await;
        let second = fx.cached.execute("check_inventory", &principal, args).await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.data, first.data);
        assert_eq!(second.message, first.message);
    }

    #[tokio::test]
    async fn hits_are_not_served_to_principals_without_permission() {
        let fx = fixture();
        let args = object(json!({"sku": "LAP-1"}));
        fx.cached.execute("check_inventory", &Principal::user("stock"), args.clone()).await;

        let denied = fx.cached.execute("check_inventory", &Principal::user("guest"), args).await;
        assert!(!denied.success);
        assert!(!denied.cached);
    }

    #[tokio::test]
    async fn ineligible_contracts_always_run() {
        let fx = fixture();
        let principal = Principal::privileged("admin");
        for _ in 0..2 {
            fx.cached.execute("exchange_rate", &principal, Map::new()).await;
            fx.cached.execute("create_sales_order", &principal, Map::new()).await;
            fx.cached.execute("ping", &principal, Map::new()).await;
        }
        assert_eq!(fx.calls.load(Ordering::SeqCst), 6);
        assert!(fx.backend.is_empty());
    }

    #[tokio::test]
    async fn invalidate_and_clear_force_fresh_calls() {
        let fx = fixture();
        let principal = Principal::user("stock");
        let north = object(json!({"sku": "N"}));
        let south = object(json!({"sku": "S"}));

        fx.cached.execute("check_inventory", &principal, north.clone()).await;
        fx.cached.execute("check_inventory", &principal, south.clone()).await;
        assert_eq!(fx.backend.len(), 2);

        fx.cached.cache().invalidate("check_inventory", &north);
        fx.cached.execute("check_inventory", &principal, north.clone()).await;
        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);

        assert_eq!(fx.cached.cache().clear_tool("check_inventory"), 2);
        fx.cached.execute("check_inventory", &principal, south).await;
        assert_eq!(fx.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let fx = fixture();
        let principal = Principal::user("stock");
        fx.cached
            .execute_with_ttl("check_inventory", &principal, Map::new(), Some(Duration::ZERO))
            .await;
        fx.cached.execute("check_inventory", &principal, Map::new()).await;
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn approval_gated_results_are_not_served_to_regular_principals() {
        let fx = fixture();
        let clerk = Principal::user("clerk");

        let before = fx.cached.execute("export_ledger", &clerk, Map::new()).await;
        assert!(before.pending_approval);

        let approved = fx.cached.execute("export_ledger", &Principal::privileged("cfo"), Map::new()).await;
        assert!(approved.success);

        let after = fx.cached.execute("export_ledger", &clerk, Map::new()).await;
        assert!(after.pending_approval);
        assert!(!after.success);
        assert!(!after.cached);
        assert_eq!(after.data, None);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_slots_are_freed_once_the_map_fills() {
        let backend = InMemoryCacheBackend::new();
        for index in 0..PURGE_THRESHOLD + 500 {
            backend.set(&format!("tool_result:t:{index}"), json!(index), Duration::ZERO).expect("set");
        }
        assert!(backend.lock().len() <= PURGE_THRESHOLD);
        assert!(backend.is_empty());

        let leftover = backend.lock().len();
        assert_eq!(backend.purge_expired(), leftover);
        assert_eq!(backend.lock().len(), 0);
    }

    #[test]
    fn clear_tool_reports_live_entries_only() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        backend.set("tool_result:check_inventory:live", json!(1), DEFAULT_TTL).expect("set");
        backend.set("tool_result:check_inventory:stale", json!(2), Duration::ZERO).expect("set");
        backend.set("tool_result:search_product:live", json!(3), DEFAULT_TTL).expect("set");

        let cache = ResultCache::new(backend.clone(), DEFAULT_TTL);
        assert_eq!(cache.clear_tool("check_inventory"), 1);
        assert_eq!(backend.lock().len(), 1);
    }

    struct UnreachableBackend;

    impl CacheBackend for UnreachableBackend {
        fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_owned()))
        }

        fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_owned()))
        }

        fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_owned()))
        }
    }

    #[test]
    fn backend_failures_read_as_misses() {
        let cache = ResultCache::new(Arc::new(UnreachableBackend), DEFAULT_TTL);
        let args = Map::new();
        let result = ExecutionResult::ok("ok", Some(json!(1)));

        assert!(!cache.put("check_inventory", &args, &result, None));
        assert!(cache.get("check_inventory", &args).is_none());
        assert_eq!(cache.clear_tool("check_inventory"), 0);

        let null = ResultCache::new(Arc::new(NullCacheBackend), DEFAULT_TTL);
        assert!(null.put("check_inventory", &args, &result, None));
        assert!(null.get("check_inventory", &args).is_none());
    }
}
