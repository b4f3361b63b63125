//! Remote stream plumbing: the transport trait, the sink it drives, and
//! the cancellation handles it returns.

mod establisher;
mod handle;
mod sink;

pub use establisher::{KindEstablishers, StreamEstablisher};
pub use handle::{CancellationHandle, HandleSet};
pub use sink::{SignalKind, StreamSignal, StreamSink};
