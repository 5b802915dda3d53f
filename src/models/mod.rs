//! Core data models for the backup utility.
//!
//! These entities describe remote listing entries, checksum tokens, the
//! retention policy and transfer progress. They carry no I/O.

pub mod multipart;
pub mod object;
pub mod policy;
pub mod progress;
