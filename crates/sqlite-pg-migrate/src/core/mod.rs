//! Core abstractions shared by the pipeline and the store drivers.
//!
//! - [`schema`]: table contracts, keys and column metadata
//! - [`value`]: SQL value representation
//! - [`row`]: named rows
//! - [`traits`]: source and target store traits

pub mod row;
pub mod schema;
pub mod traits;
pub mod value;

pub use row::Row;
pub use schema::{
    ColumnInfo, ColumnMapping, ForeignKeySpec, KeyMode, PkValue, ReferencePolicy,
    StructuredColumn, StructuredShape, TableSpec,
};
pub use traits::{
    with_timeout, InsertRequest, ReadOptions, ReferenceCheck, ReferenceCount, SourceStore,
    TargetStore, TargetTransaction,
};
pub use value::SqlValue;
