//! Pure domain types for the tactical map overlay.
//!
//! No I/O lives here: entity records and their wire format, annotation
//! lifecycle, geometry validation, the category resolver, and the types
//! handed to the external map library.

pub mod annotation;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod map;
pub mod resolver;
pub mod types;
