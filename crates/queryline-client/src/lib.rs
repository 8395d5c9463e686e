//! # queryline-client
//!
//! Request pipelines and request coalescing on top of `queryline-timeline`.
//!
//! - [`Query`]: a timeline whose moments run one request from `init` to
//!   `dispose`; customize it with observers and [behaviors](behaviors)
//! - [`Transport`]: the seam where bytes actually move
//! - [`BatchQueue`]: intercepts `send` on registered queries and coalesces
//!   their requests into aggregate calls of at most
//!   [`BatchConfig::max_chunk_size`] fragments
//!
//! ```ignore
//! let batch = BatchQueue::new(transport.clone(), BatchConfig::default());
//! let mut me = Query::connected("https://graph.microsoft.com/v1.0/me", transport.clone())?;
//! let mut drive = me.child("https://graph.microsoft.com/v1.0/me/drive");
//! batch.register(&mut me)?;
//! batch.register(&mut drive)?;
//!
//! let (me, drive, flushed) = tokio::join!(
//!     me.execute(RequestInit::get()),
//!     drive.execute(RequestInit::get()),
//!     batch.flush(),
//! );
//! ```

pub mod batch;
pub mod behaviors;
pub mod config;
pub mod error;
pub mod query;
pub mod transport;

pub use batch::codec::{self, DecodedBatch, ItemResponse};
pub use batch::{BatchQueue, Settle};
pub use config::{BatchConfig, ConfigError};
pub use error::{BatchError, HttpStatusError, QueryError, TransportError};
pub use query::{ParseState, Query};
pub use transport::Transport;
