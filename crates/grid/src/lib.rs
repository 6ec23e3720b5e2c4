//! Template grid matching: encode a price window onto an M×N grid, score it
//! against stored templates and resolve a trading decision from the winner.

pub mod config;
pub mod decision;
pub mod encoder;
pub mod library;
pub mod matcher;
pub mod similarity;

pub use config::DetectionConfig;
pub use decision::{DecisionResolver, Resolution};
pub use encoder::{Encoding, GridEncoder};
pub use library::{CandidateSet, InMemorySource, PatternLibrary, UnavailableSource};
pub use matcher::{MatchEngine, Tick};
pub use similarity::similarity;
