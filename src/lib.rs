//! # Subscription Multiplexer
//!
//! Opens one long-lived remote change stream per (entity type, change
//! kind) pair, fans them into a single ordered, replayable buffer, and
//! drains that buffer strictly sequentially through a pluggable merger.
//!
//! ## Core Concepts
//!
//! - **Descriptors**: one per entity type × {create, update, delete}
//! - **Start barrier**: `start` blocks until every stream started or failed,
//!   bounded by a timeout
//! - **Session buffer**: append-only, replayable, one terminal signal; rebuilt
//!   on every start
//! - **Drain loop**: one merge at a time; per-event failures are skipped, a
//!   terminal buffer signal fires the pipeline-broken callback once
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use submux::{EntityType, Multiplexer, MultiplexerConfig, StartOutcome};
//!
//! let mux = Multiplexer::new(
//!     MultiplexerConfig::default(),
//!     Arc::new(transport),
//!     Arc::new(vec![EntityType::new("Post"), EntityType::new("Comment")]),
//!     Arc::new(merger),
//! );
//!
//! if let StartOutcome::TimedOut { pending } = mux.start()? {
//!     eprintln!("{} subscriptions still pending", pending);
//! }
//! mux.drain(|terminal| eprintln!("pipeline broken: {:?}", terminal))?;
//!
//! // Later
//! mux.stop();
//! ```

pub mod barrier;
pub mod buffer;
pub mod drain;
pub mod error;
pub mod fanin;
pub mod multiplexer;
pub mod streams;
pub mod types;

// Re-exports
pub use barrier::{BarrierOutcome, StartBarrier};
pub use buffer::{BufferItem, BufferReader, EventBuffer, Terminal};
pub use drain::{DrainEnd, DrainHandle, DrainLoop, DrainReport, Merger, PipelineBroken};
pub use error::{MergeError, MuxError, Result, StreamError};
pub use fanin::FanIn;
pub use multiplexer::{
    LifecycleEvent, LifecyclePublisher, ModelProvider, Multiplexer, MultiplexerConfig,
    MultiplexerState, NoopPublisher, StartOutcome,
};
pub use streams::{
    CancellationHandle, HandleSet, KindEstablishers, SignalKind, StreamEstablisher, StreamSignal,
    StreamSink,
};
pub use types::*;
