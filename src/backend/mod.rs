//! Store backends.
//!
//! - [`redis::RedisBackend`]: production backend over Redis pub/sub
//! - [`memory::MemoryBackend`]: in-process store for tests and local runs

pub mod memory;
pub mod redis;
pub mod script;
pub mod traits;

pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use script::{RecoveryScript, RECOVERY_LUA};
pub use traits::{
    Backend, NodeConnection, Notification, NotificationReceiver, NotificationSender,
    SubscriberConnection, WorkerConnection,
};
