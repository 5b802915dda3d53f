//! Services behind the backup flow.
//!
//! The checksum core (`digest`, `part_sizer`, `reconciler`) and the
//! retention predicate are synchronous and free of I/O beyond local file
//! reads. Everything touching processes, the network or the object store
//! sits behind a trait so `BackupService` can be driven in tests.

pub mod backup_service;
pub mod digest;
pub mod dump;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory_store;
pub mod notifier;
pub mod object_store;
pub mod part_sizer;
pub mod reconciler;
pub mod retention;
pub mod s3_gateway;
