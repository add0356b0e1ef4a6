//! Per-flow state machines
//!
//! Each flow is a closed enum of tagged states. Transition, predicate and
//! mapping logic are pure functions over `Copy` values; nothing here holds
//! mutable state. The flow controllers own sequencing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::models::FlowKind;

pub mod quarterly;
pub mod quick;
pub mod setup;

pub use quarterly::QuarterlyState;
pub use quick::QuickState;
pub use setup::{ProblemCursor, SetupState};

/// Upper bound on `next` applications from `initial` to a terminal state.
pub const MAX_PATH_LENGTH: usize = 128;

pub trait FlowState:
    Copy + Eq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const FLOW: FlowKind;

    fn initial() -> Self;
    fn finalized() -> Self;
    fn abandoned() -> Self;

    /// Total successor function. Terminals map to themselves.
    fn next(self) -> Self;

    /// Main question states. Disjoint from clarify states.
    fn is_question(self) -> bool;
    fn is_clarify(self) -> bool;

    fn clarify_of(self) -> Option<Self>;
    fn parent_of(self) -> Option<Self>;

    /// Main question states whose answers pass through the vagueness gate.
    fn requires_vagueness_check(self) -> bool {
        self.is_question() && self.clarify_of().is_some()
    }

    /// 0..=100, non-decreasing along `next`.
    fn progress_weight(self) -> u8;

    /// Analytic steps the controller runs and advances on its own.
    fn is_derived(self) -> bool {
        false
    }

    /// Stable snake_case name used in transcripts and logs.
    fn label(self) -> &'static str;

    fn is_terminal(self) -> bool {
        self == Self::finalized() || self == Self::abandoned()
    }
}

/// States visited by repeated `next` from `initial`, terminal included.
/// Returns `None` when no terminal is reached within `MAX_PATH_LENGTH`.
pub fn path_to_terminal<S: FlowState>(start: S) -> Option<Vec<S>> {
    let mut path = vec![start];
    let mut current = start;

    for _ in 0..MAX_PATH_LENGTH {
        if current.is_terminal() {
            return Some(path);
        }
        current = current.next();
        path.push(current);
    }

    None
}

#[cfg(test)]
pub(crate) mod laws {
    use super::*;

    /// Properties every flow's machine must satisfy.
    pub fn assert_machine_laws<S: FlowState>(states: &[S]) {
        let path = path_to_terminal(S::initial()).expect("terminal reachable");
        let last = *path.last().unwrap();
        assert_eq!(last, S::finalized(), "{:?} path ends at {:?}", S::FLOW, last);

        for pair in path.windows(2) {
            assert!(
                pair[0].progress_weight() <= pair[1].progress_weight(),
                "weight decreases from {:?} to {:?}",
                pair[0],
                pair[1]
            );
        }

        assert_eq!(S::finalized().next(), S::finalized());
        assert_eq!(S::abandoned().next(), S::abandoned());

        for &state in states {
            assert!(state.progress_weight() <= 100);
            assert!(
                !(state.is_question() && state.is_clarify()),
                "{:?} is both question and clarify",
                state
            );
            if let Some(clarify) = state.clarify_of() {
                assert!(state.is_question(), "{:?} has a clarify but is not a question", state);
                assert!(clarify.is_clarify());
                if let Some(parent) = clarify.parent_of() {
                    assert_eq!(parent, state, "parent_of(clarify_of({:?}))", state);
                }
            }
            if let Some(parent) = state.parent_of() {
                assert!(state.is_clarify());
                assert_eq!(parent.clarify_of(), Some(state));
                assert!(state.progress_weight() <= state.next().progress_weight());
            }
            if state.requires_vagueness_check() {
                assert!(state.is_question() && !state.is_clarify());
            }
            // Every state, wherever it sits, still reaches a terminal.
            assert!(path_to_terminal(state).is_some(), "{:?} never terminates", state);
        }
    }
}
