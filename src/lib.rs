//! tscore - time-series aggregation kernel and timer service.
//!
//! This library provides the two core subsystems of the execution engine:
//! - `exec` - per-column aggregation operators with a two-phase
//!   distributed reduction protocol
//! - `timer` - a hierarchical timing wheel for millions of short-deadline
//!   callbacks

pub mod block;
pub mod exec;
pub mod timer;
pub mod types;
pub mod util;
