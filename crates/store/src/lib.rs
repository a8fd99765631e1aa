//! External collaborators of the experiment engine
//!
//! The engine never talks to a database or a cache directly. It goes through
//! two narrow contracts defined here:
//!
//! - [`RecordStore`]: experiment/variant records with atomic counter
//!   increments and a set-once winner update
//! - [`AllocationCache`]: the `(experiment, subject) -> variant` mapping with a
//!   long retention window
//!
//! In-memory implementations back tests and local runs; [`RedisAllocationCache`]
//! shares allocations across engine instances.

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis_cache;

pub use backend::{allocation_key, AllocationCache, RecordStore};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryAllocationCache, MemoryRecordStore};
pub use redis_cache::{RedisAllocationCache, RedisCacheConfig};
