//! Core data model shared by every stage of a backup run.

pub mod group_resource;
pub mod item;
pub mod request;
pub mod volume;

pub use group_resource::{GroupResource, ResourceIdentifier};
pub use item::ResourceItem;
pub use request::{BackupRequest, BackupSpec, SnapshotLocation};
pub use volume::{SnapshotPhase, VolumeSnapshot, VolumeSnapshotSpec, VolumeSnapshotStatus};
