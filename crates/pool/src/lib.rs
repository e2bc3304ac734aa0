//! # Nebula Pool
//!
//! Bounded asynchronous pool of reusable resources such as connections.
//! A [`Factory`] supplies creation, validation and teardown; the [`Pool`]
//! decides when to call them.
//!
//! - waiters are served FIFO, idle resources are reused LIFO
//! - `min_size` is replenished eagerly, `max_size` is never exceeded
//! - idle resources are reaped after `idle_timeout`
//! - resources are retired after `max_uses` releases
//! - [`Pool::drain`] and [`Pool::destroy_all_now`] handle shutdown
//!
//! ```no_run
//! use nebula_pool::{FnFactory, Pool, PoolConfig};
//!
//! # async fn demo() -> nebula_pool::Result<()> {
//! let factory = FnFactory::<Vec<u8>>::builder()
//!     .name("buffers")
//!     .create(|| async { Ok::<_, std::io::Error>(Vec::with_capacity(4096)) })
//!     .destroy(|_buf| async { Ok::<_, std::io::Error>(()) })
//!     .validate(|buf| buf.capacity() >= 4096)
//!     .build()?;
//!
//! let pool = Pool::new(factory, PoolConfig { max_size: 4, ..Default::default() })?;
//! let mut buf = pool.acquire().await?;
//! buf.extend_from_slice(b"hello");
//! pool.release(buf);
//!
//! pool.drain().await;
//! pool.destroy_all_now().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod deferred;
pub mod error;
pub mod factory;
pub mod guard;
pub mod log;
pub mod pool;

pub use aggregate::AggregateError;
pub use config::PoolConfig;
pub use deferred::{Deferred, Promise};
pub use error::{BoxError, Error, Result, TimeoutError};
pub use factory::{FnFactory, FnFactoryBuilder, Factory};
pub use guard::{Pooled, ResourceId};
pub use log::{LogLevel, PoolLog, TracingLog};
pub use pool::{Pool, PoolBuilder, PoolStats};
