//! 派发与背压引擎：候选选择、预算约束下的派发、溢出重发以及驱动它们的循环

pub mod budget;
pub mod dispatcher;
pub mod ingress;
pub mod overflow;
pub mod selector;
pub mod trigger;

pub use budget::DispatchBudget;
pub use dispatcher::{AbandonedCandidate, DispatchReport, HaltReason, RetryDispatcher};
pub use ingress::DispatchConsumer;
pub use overflow::{OverflowRepublisher, RepublishOutcome};
pub use selector::{CandidateSelector, SelectionReport};
pub use trigger::SelectionTrigger;
