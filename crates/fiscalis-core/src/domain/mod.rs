//! # Domain Models
//!
//! Canonical domain types produced by the aggregation layer.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SubjectId`] | Validated CPF/CNPJ subject identifier |
//! | [`SourceRecord`] | Raw record extracted from one provider payload |
//! | [`CollectionResult`] | Outcome of one provider attempt for one subject |
//! | [`Opportunity`] | Normalized, valued claim |
//! | [`CompensationPairing`] | Advisory credit/debt offset |
//! | [`SubjectAggregate`] | Per-subject roll-up handed to the record store |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Construction validates invariants (finite, non-negative values; digit-only
//! subject ids), so downstream code never re-checks them.

mod collection;
mod opportunity;
mod subject;
mod timestamp;

pub use collection::{CollectionResult, Coverage, SubjectAggregate};
pub use opportunity::{
    CompensationPairing, Opportunity, OpportunityCategory, Priority, Provenance, SourceRecord,
};
pub use subject::{SubjectId, SubjectKind};
pub use timestamp::UtcDateTime;
