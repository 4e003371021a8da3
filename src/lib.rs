// Copyright 2026 Oxide Computer Company

//! A multi-field packet classifier for OpenFlow-style flow tables.
//!
//! [`CombinedClassifier`] matches a packet against a large, prioritised
//! rule set and returns the highest-priority matching rule. Internally it
//! splits rules into a *contiguous* subset -- threaded through a forest of
//! [`sortable_tree::SortableTree`]s built by [`partitioner`] / maintained by
//! [`combined::PartitionSort`] -- and a *discontiguous* subset handled by a
//! flat [`generic::GenericClassifier`] scan. [`oxm`] is the boundary: it
//! converts flow-table records and packet buffers into the canonical
//! [`rule::Rule`] / point-vector forms everything below it operates on.
//!
//! This crate has no wire or file format and no I/O of its own; see each
//! module's documentation for the algorithms, and [`error::ClassifierError`]
//! for the failure modes.

pub mod combined;
pub mod error;
pub mod generic;
pub mod interval;
pub mod observability;
pub mod oxm;
pub mod partitioner;
pub mod range_tree;
pub mod rule;
pub mod sortable_tree;

pub use combined::{ClassifierConfig, CombinedClassifier, ConstructionMode};
pub use error::ClassifierError;
pub use oxm::{Flow, HeaderBase, Match, OxmField, Packet};
pub use rule::{FieldRange, Point, Rule, RuleId};
