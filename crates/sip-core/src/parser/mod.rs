//! nom-based parsers shared by the data model.

pub mod address;
pub mod uri;
