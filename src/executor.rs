//! Script execution against the shared key-value store
//!
//! This is the storage seam of the crate: strategies talk to a
//! [`ScriptExecutor`] trait object, never to a concrete client. The shipped
//! implementation, [`RedisScriptExecutor`], runs Lua scripts atomically on
//! Redis, caches compiled script handles process-wide, and enumerates keys
//! with cursor-based SCAN so it never blocks the single-threaded server
//! with a full-namespace sweep.

use crate::RateLimitError;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use std::future::Future;
use std::time::Duration;

/// Default per-call deadline for any storage operation.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// SCAN batch size. Bounded so a scan is a sequence of short commands
/// instead of one long one.
const SCAN_BATCH: usize = 100;

/// One element of a raw script reply.
///
/// Lua numbers come back as signed 64-bit integers; anything the script
/// emits with `tostring`/`string.format` comes back as text. Scripts that
/// need to move non-integer values across the wire encode them as strings,
/// because a Lua number returned to the server is truncated to an integer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Int(i64),
    Text(String),
}

impl ScriptValue {
    /// The integer value, if this element is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(n) => Some(*n),
            ScriptValue::Text(_) => None,
        }
    }

    /// The element read as a double: integers convert exactly, text is
    /// parsed. This is the precision-preserving path for values a script
    /// formatted with `%.17g`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(n) => Some(*n as f64),
            ScriptValue::Text(s) => s.parse().ok(),
        }
    }
}

/// Atomic script execution and key management against the KVS.
///
/// Implementations must run each script as a single atomic unit: the whole
/// read-decide-write sequence of one admission decision happens inside one
/// invocation, with no interleaving from other clients.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Execute a script and return its reply with element types preserved.
    async fn execute_script_raw(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<ScriptValue>, RateLimitError>;

    /// Execute a script and return only the integer elements of its reply.
    ///
    /// Convenience view for scripts whose contract is all-integer; text
    /// elements are dropped, matching positional decoding against the
    /// integer-only contract.
    async fn execute_script(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, RateLimitError> {
        let raw = self.execute_script_raw(script, keys, args).await?;
        Ok(raw.into_iter().filter_map(|element| element.as_int()).collect())
    }

    /// Delete the given keys. Deleting a key that does not exist is not an
    /// error.
    async fn delete_keys(&self, keys: &[String]) -> Result<(), RateLimitError>;

    /// Find all keys matching a glob pattern.
    ///
    /// The result is unordered and may contain transient duplicates; SCAN
    /// cursor semantics permit a key to be returned more than once while
    /// the keyspace changes underneath.
    async fn find_keys(&self, pattern: &str) -> Result<Vec<String>, RateLimitError>;
}

/// [`ScriptExecutor`] backed by Redis.
///
/// Holds a reconnecting multiplexed connection and a process-wide cache of
/// compiled [`Script`] handles keyed by verbatim script text. Repeat
/// lookups read the cache without contending on a writer; concurrent first
/// callers may both compile, but only one handle is ever published.
#[derive(Clone)]
pub struct RedisScriptExecutor {
    connection: ConnectionManager,
    scripts: std::sync::Arc<DashMap<String, Script>>,
    call_timeout: Duration,
}

impl std::fmt::Debug for RedisScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisScriptExecutor")
            .field("cached_scripts", &self.scripts.len())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl RedisScriptExecutor {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/`).
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)
            .map_err(|e| RateLimitError::storage_with("invalid Redis URL", e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::storage_with("failed to connect to Redis", e))?;
        Ok(Self {
            connection,
            scripts: std::sync::Arc::new(DashMap::new()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Override the per-call deadline (default [`DEFAULT_CALL_TIMEOUT`]).
    ///
    /// A call that exceeds the deadline is reported as a storage failure.
    /// The script may still complete on the server side; callers must
    /// tolerate state having been mutated by an abandoned call.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Look up or compile the script handle for `text`.
    fn cached_script(&self, text: &str) -> Script {
        if let Some(script) = self.scripts.get(text) {
            return script.clone();
        }
        // Losers of the insert race drop their handle and adopt the winner's.
        self.scripts
            .entry(text.to_owned())
            .or_insert_with(|| Script::new(text))
            .value()
            .clone()
    }

    /// Apply the call deadline to one storage future.
    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T, RateLimitError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RateLimitError::storage_with(what, e)),
            Err(_) => Err(RateLimitError::storage(format!(
                "{} exceeded the {}ms deadline",
                what,
                self.call_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ScriptExecutor for RedisScriptExecutor {
    async fn execute_script_raw(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<ScriptValue>, RateLimitError> {
        let script = self.cached_script(script);
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        let mut connection = self.connection.clone();
        let reply: Value = self
            .bounded("script execution", invocation.invoke_async(&mut connection))
            .await?;
        decode_reply(reply)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), RateLimitError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut command = redis::cmd("DEL");
        for key in keys {
            command.arg(key.as_str());
        }
        let mut connection = self.connection.clone();
        let _deleted: i64 = self.bounded("key deletion", command.query_async(&mut connection)).await?;
        Ok(())
    }

    async fn find_keys(&self, pattern: &str) -> Result<Vec<String>, RateLimitError> {
        let mut connection = self.connection.clone();
        let mut found = Vec::new();
        // SCAN state lives entirely in the cursor value, so bailing out on
        // an error leaves nothing to release server-side.
        let mut cursor: u64 = 0;
        loop {
            let mut command = redis::cmd("SCAN");
            command.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) =
                self.bounded("key scan", command.query_async(&mut connection)).await?;
            found.extend(batch);
            if next == 0 {
                return Ok(found);
            }
            cursor = next;
        }
    }
}

/// Decode a top-level script reply into typed elements.
fn decode_reply(reply: Value) -> Result<Vec<ScriptValue>, RateLimitError> {
    match reply {
        Value::Array(items) => items.into_iter().map(decode_element).collect(),
        Value::Nil => Ok(Vec::new()),
        other => Err(RateLimitError::storage(format!(
            "expected an array reply from script, got {:?}",
            other
        ))),
    }
}

fn decode_element(value: Value) -> Result<ScriptValue, RateLimitError> {
    match value {
        Value::Int(n) => Ok(ScriptValue::Int(n)),
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(ScriptValue::Text)
            .map_err(|e| RateLimitError::storage_with("non-UTF-8 script reply element", e)),
        Value::SimpleString(text) => Ok(ScriptValue::Text(text)),
        other => Err(RateLimitError::storage(format!(
            "unexpected script reply element: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_values_convert_to_ints_and_doubles() {
        assert_eq!(ScriptValue::Int(7).as_int(), Some(7));
        assert_eq!(ScriptValue::Int(7).as_f64(), Some(7.0));
        assert_eq!(ScriptValue::Text("8.5".into()).as_int(), None);
        assert_eq!(ScriptValue::Text("8.5".into()).as_f64(), Some(8.5));
        assert_eq!(ScriptValue::Text("not a number".into()).as_f64(), None);
    }

    #[test]
    fn text_parse_preserves_seventeen_digit_doubles() {
        // The exact form a script emits via string.format('%.17g', x).
        let value = ScriptValue::Text("1753900000.1234567".into());
        assert_eq!(value.as_f64(), Some(1753900000.1234567_f64));
    }

    #[test]
    fn decode_reply_preserves_mixed_element_types() {
        let reply = Value::Array(vec![
            Value::Int(1),
            Value::BulkString(b"9.25".to_vec()),
            Value::Int(10),
        ]);
        let decoded = decode_reply(reply).unwrap();
        assert_eq!(
            decoded,
            vec![ScriptValue::Int(1), ScriptValue::Text("9.25".into()), ScriptValue::Int(10)]
        );
    }

    #[test]
    fn decode_reply_rejects_non_array_toplevel() {
        let err = decode_reply(Value::Int(1)).unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn decode_reply_treats_nil_as_empty() {
        assert_eq!(decode_reply(Value::Nil).unwrap(), Vec::new());
    }

    #[test]
    fn decode_element_rejects_nested_arrays() {
        let err = decode_element(Value::Array(vec![])).unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn script_cache_publishes_one_handle_per_text() {
        let scripts: DashMap<String, Script> = DashMap::new();
        let text = "return 1";
        let first = scripts
            .entry(text.to_owned())
            .or_insert_with(|| Script::new(text))
            .value()
            .get_hash()
            .to_owned();
        let second = scripts
            .entry(text.to_owned())
            .or_insert_with(|| Script::new("return 2"))
            .value()
            .get_hash()
            .to_owned();
        // The second caller must observe the first caller's handle.
        assert_eq!(first, second);
        assert_eq!(scripts.len(), 1);
    }

    #[test]
    fn distinct_scripts_hash_differently() {
        assert_ne!(Script::new("return 1").get_hash(), Script::new("return 2").get_hash());
    }
}
