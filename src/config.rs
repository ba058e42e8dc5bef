//! Configuration and credential snapshots.
//!
//! Every signed attempt reads one immutable [`snapshot::Snapshot`] from a
//! [`snapshot::ConfigProvider`]. Rotation publishes a whole new snapshot, so a
//! signature can never mix an old access key with a new secret.

/// Role credentials read from files and refreshed in the background.
pub mod role_files;

/// JSON configuration file and environment overrides.
pub mod settings;

/// Credentials, endpoints and the providers that hand out snapshots of them.
pub mod snapshot;
