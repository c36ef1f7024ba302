//! Stateright Model Checking
//!
//! Exhaustive state-space exploration of the coordination protocol the
//! merge buffer relies on. DST (`merge::dst`) exercises the real code under
//! faults; these models cover every interleaving of a small configuration.
//!
//! ## Available Models
//!
//! - `drain_protocol`: lock, drain and lock expiry across racing workers
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Larger configurations are marked #[ignore]
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod drain_protocol;

pub use drain_protocol::{DrainProtocolModel, DrainStyle};
