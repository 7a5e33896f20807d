//! Arrow <-> columnar store conversion.
//!
//! Columnar stores and Arrow primitive arrays share a layout: a flat,
//! little-endian run of fixed-width values per column. This crate maps
//! schemas between the two and copies column bytes across.
//!
//! # Layout contract
//!
//! ```text
//! [  value[0]  |  value[1]  | ... |  value[n-1]  ]
//! ```
//!
//! Columnar stores have no null encoding, so Arrow columns with nulls are
//! rejected instead of being filled with sentinels.

pub mod record_batch_convert;
pub mod schema_utils;

pub use record_batch_convert::{record_batch_to_store, store_to_record_batch};
pub use schema_utils::{column_type_from_arrow, column_type_to_arrow, to_arrow_schema, SchemaExt};
