//! Gatepass Policy Engine
//!
//! Turns a resolved identity into an exit verdict. Classification derives two
//! facts from the record (adult by birth date, eligible for school
//! transport); the engine applies them in strict order and, for a minor
//! without transport, suspends on a single-use escort challenge that only an
//! explicit operator answer can resolve.
//!
//! Key features:
//! - Whole-year age computation with month/day correction (Feb 29 safe)
//! - Fail-closed age check: a missing birth date is never adult
//! - Closed `Severity` / `ReasonCode` vocabulary, checked exhaustively
//! - Move-only `EscortChallenge` (cannot be answered twice)
//! - Unknown cards short-circuit to a denial without classification

pub mod classifier;
pub mod engine;
pub mod error;
pub mod types;

// Re-export primary types for convenience
pub use classifier::{age_on, classify};
pub use engine::{EscortChallenge, Evaluation, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
pub use types::{Eligibility, PolicyConfig, Subject, Verdict, DEFAULT_ADULT_AGE};
