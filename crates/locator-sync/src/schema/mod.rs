//! Wire rows and write-intent validation.
//!
//! - [`row`] — `locations` / `reviews` row shapes and conversions.
//! - [`validate`] — form normalization and draft checks.

pub mod row;
pub mod validate;

pub use row::{decode_location, decode_review, LocationRow, ReviewRow};
pub use validate::{normalize_review, parse_beds, validate_location, validate_review, LocationInput};
