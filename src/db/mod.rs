pub mod cache;
pub mod postgres;
pub mod redis;

mod macros;

pub use cache::{CacheStore, MemoryStore};
pub use postgres::create_pool;
pub use self::redis::{create_redis_client, RedisStore};
