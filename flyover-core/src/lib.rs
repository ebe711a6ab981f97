//! flyover-core: closest-approach prediction and alert rules.
//!
//! No async, no I/O beyond the config file, just algorithms. The server
//! crate wires these to the aircraft feed, the SQLite store and the push
//! delivery channel.

pub mod approach;
pub mod config;
pub mod dedup;
pub mod feed;
pub mod geometry;
pub mod rules;
pub mod types;

// Re-export commonly used types at crate root
pub use approach::{screen, Encounter, Rejection, ScreeningLimits};
pub use dedup::DedupGate;
pub use feed::{sanitize, RawAircraft};
pub use rules::{compile, Condition, Filter, FilterDef, RuleSet};
pub use types::*;
