//! Phone number resolution.
//!
//! Raw input is normalized to digits, expanded into ranked candidates by the
//! numbering plan of its country, and probed against the provider one
//! candidate at a time. The first candidate the network knows wins; the
//! original form is always probed first so a verified number is never
//! replaced by a guessed variant.

pub mod engine;
pub mod error;
pub mod normalize;
pub mod plan;
pub mod resolver;

pub use {
    engine::{ResolutionEngine, ResolutionResult, SendTarget},
    error::PhoneError,
    normalize::{LID_SUFFIX, NormalizedNumber, NumberNormalizer, lid_digits},
    plan::{Candidate, CandidateGenerator, Variation},
    resolver::ExistenceResolver,
};
