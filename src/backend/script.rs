// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Server-side recovery script.
//!
//! Forces a key's version forward and publishes it, unless another recovery
//! for the same key holds the guard.
//!
//! ```text
//! KEYS[1]  dependency key
//! KEYS[2]  guard key (write dependencies only)
//! ARGV[1]  wanted version
//! ARGV[2]  guard TTL in seconds
//! returns  wanted - current, or nil when nothing changed
//! ```

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use crate::error::SyncError;

pub const RECOVERY_LUA: &str = r#"
local key = KEYS[1]
local guard = KEYS[2]
local wanted = tonumber(ARGV[1])

if guard and redis.call('EXISTS', guard) == 1 then
  return nil
end

local current = tonumber(redis.call('GET', key) or '0')
if wanted > current then
  if guard then
    redis.call('SET', guard, '1', 'EX', ARGV[2])
  end
  redis.call('SET', key, wanted)
  redis.call('PUBLISH', key, wanted)
  return wanted - current
end

return nil
"#;

/// The recovery script, built once and shared by every worker connection.
pub struct RecoveryScript {
    script: Script,
    guard_ttl: Duration,
}

impl RecoveryScript {
    #[must_use]
    pub fn new(guard_ttl: Duration) -> Self {
        Self {
            script: Script::new(RECOVERY_LUA),
            guard_ttl,
        }
    }

    /// SHA1 the script is cached under on the server.
    #[must_use]
    pub fn hash(&self) -> &str {
        self.script.get_hash()
    }

    /// Load the script into the server's script cache.
    pub async fn register(&self, conn: &mut ConnectionManager) -> Result<(), SyncError> {
        let sha: String = self.script.prepare_invoke().load_async(conn).await?;
        debug!(sha = %sha, "Recovery script registered");
        Ok(())
    }

    /// Run the script. `EVALSHA` falls back to `EVAL` if the cache was flushed.
    pub async fn run(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
        wanted_version: u64,
        guard_key: Option<&str>,
    ) -> Result<Option<u64>, SyncError> {
        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(key)
            .arg(wanted_version)
            .arg(self.guard_ttl.as_secs().max(1));
        if let Some(guard) = guard_key {
            invocation.key(guard);
        }
        let delta: Option<u64> = invocation.invoke_async(conn).await?;
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_hash_is_stable() {
        let a = RecoveryScript::new(Duration::from_secs(10));
        let b = RecoveryScript::new(Duration::from_secs(1));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 40);
    }

    #[test]
    fn test_script_publishes_on_key_channel() {
        assert!(RECOVERY_LUA.contains("redis.call('PUBLISH', key, wanted)"));
        assert!(RECOVERY_LUA.contains("'EX', ARGV[2]"));
    }
}
