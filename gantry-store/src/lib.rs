pub mod repository;
pub mod snapshot;
pub mod watcher;

pub use repository::Repository;
pub use snapshot::{build_snapshot, ReloadCoordinator, RoutingSnapshot, SnapshotHandle};
pub use watcher::{ChangeEvent, ConfigWatcher};
