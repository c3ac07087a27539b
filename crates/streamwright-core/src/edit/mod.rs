//! Streamed edit application
//!
//! - `LineAccumulator`: fragments in, complete lines out
//! - `EditRegion`/`RegionCursor`: which lines a request rewrites, and where the next line goes
//! - `StreamProcessor`: applies lines to a document as single-line transactions
//! - `EditCoordinator`: per-request state machines, writer leases, cancellation

mod accumulator;
mod applier;
mod coordinator;
mod region;

pub use accumulator::LineAccumulator;
pub use applier::{apply_whole_content, StreamProcessor};
pub use coordinator::{EditCoordinator, EditOutcome, EditStart, RequestPhase};
pub use region::{EditRegion, RegionCursor};
