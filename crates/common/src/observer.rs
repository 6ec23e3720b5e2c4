use crate::{Match, Result};

/// Receives every match the live monitor produces.
///
/// `notify` is called synchronously on the evaluating stream's task, so it
/// should return quickly; hand heavy work off to a channel. The match is
/// borrowed for the duration of the call only. Clone it to keep it.
///
/// An `Err` return (or a panic) is logged by the monitor and never reaches
/// other observers or other streams.
pub trait MatchObserver: Send + Sync {
    /// Name used in logs when this observer fails.
    fn name(&self) -> &str {
        "observer"
    }

    fn notify(&self, m: &Match) -> Result<()>;
}
