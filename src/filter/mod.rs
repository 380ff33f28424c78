//! Domain-filter expressions over Arrow record batches.
//!
//! A domain filter restricts which trees/conditions/plots contribute to an
//! estimate. The language is deliberately small: comparisons, `IN`,
//! `BETWEEN`, `IS [NOT] NULL`, composed with `AND` only. `OR` and `NOT` are
//! a documented limitation and rejected at parse time.

pub mod expr;
pub mod parse;

pub use expr::{CmpOp, DomainExpr, Literal};
pub use parse::parse_domain;
