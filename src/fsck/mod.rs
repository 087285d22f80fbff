//! Read-only consistency checker.
//!
//! Reads through a [`fsck_backend::FsckBackend`] so the checks run against a
//! mounted [`crate::Ext2Volume`] or any other source of ext2 structures.

pub mod fsck;
pub mod fsck_backend;
pub mod fsck_types;

pub use fsck::run_fsck;
pub use fsck_backend::FsckBackend;
pub use fsck_types::FsckReport;
