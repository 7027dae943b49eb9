//! `relmt-core` — the relational decision-tree condition search engine.
//!
//! Given one peripheral table, one aggregation kind, and the current set of
//! matches between population rows and peripheral rows, this crate finds
//! the sequence of boolean conditions over peripheral columns that, once
//! used to filter the matches before aggregation, maximises a loss-reduction
//! criterion — then replays that decision tree over fresh matches to emit a
//! feature column. See `SPEC_FULL.md` for the full component breakdown.

pub mod aggregator;
pub mod column;
pub mod config;
pub mod criterion;
pub mod descriptors;
pub mod driver;
pub mod error;
pub mod indices;
pub mod matches;
pub mod reduce;
pub mod split;
pub mod tree;
pub mod value_provider;

pub use column::{Column, PopulationView, Table};
pub use config::Hyperparameters;
pub use descriptors::{AggregationKind, DataSource};
pub use driver::{AggregationTask, Driver, FittedFeature};
pub use error::{CoreError, Result};
pub use indices::CategoryEncoder;
pub use matches::{Match, MatchStore};
pub use reduce::{LocalReducer, Reducer};
pub use tree::{column_importances, Node, SplitDescriptor, Tree};
