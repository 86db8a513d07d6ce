// Signal detectors that run over the whole batch before feature folding.
//
// Duplicates and coordination are independent of each other; account
// heuristics consume both of their id sets.

pub mod accounts;
pub mod coordination;
pub mod duplicates;

pub use accounts::{score_accounts, AccountFlag, AccountHeuristic};
pub use coordination::{detect_coordination, CoordinationEvent, CoordinationReport};
pub use duplicates::{detect_duplicates, DuplicateReport};
