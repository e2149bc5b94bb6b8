//! Status records
//!
//! The status verb walks the liveview and turns each interesting item into a
//! [`status_record::StatusRecord`].

pub mod status_record;
