//! Detectors.
//!
//! Four per-candidate detectors read one frozen [`CandidateSession`] each and
//! are independent of one another. The similarity detector is the only one
//! that looks across candidates.
//!
//! [`CandidateSession`]: crate::response::CandidateSession

pub mod person_fit;
pub mod revision;
pub mod sequential;
pub mod similarity;
pub mod timing;

pub use person_fit::{AbilityEstimates, ItemParameter, ItemParameters, PersonFitDetector};
pub use revision::{RevisionDetector, RevisionOutcome, RevisionSummary, TransitionCounts};
pub use sequential::SequentialDetector;
pub use similarity::{SimilarityDetector, SimilarityMetric, SimilarityOutcome, SimilaritySummary};
pub use timing::{ResponseTimeSummary, TimingDetector, TimingOutcome};

/// Whole milliseconds for a threshold given in seconds.
pub(crate) fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
