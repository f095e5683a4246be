//! Case timeline: append-only event ledger and its types.

pub mod ledger;
pub mod types;

pub use ledger::{AppendOutcome, TimelineLedger};
pub use types::{
    Actor, ActorType, CaseStage, NewTimelineEvent, StageEntry, TimelineEvent, TimelineEventType,
};
