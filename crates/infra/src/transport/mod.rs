//! Transport implementations: Redis Streams for production, in-memory for
//! tests and single-process deployments.

mod in_memory;
mod redis;

pub use in_memory::InMemoryTransport;
pub use redis::RedisTransport;
