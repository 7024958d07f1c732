//! Nuvex client -- a high-level facade over the tiered storage engine:
//! namespace helpers, batch pass-throughs, a process-singleton lifecycle,
//! configuration, and the backup/restore envelope.
//!
//! - **Client** ([`client`]): [`Client`], the facade itself.
//! - **Backup** ([`backup`]): the on-disk envelope format and
//!   [`Client::backup`]/[`Client::restore`].

mod backup;
mod client;

pub use backup::{BackupEntry, BackupEnvelope, BackupMetadata, BackupOptions, BackupOutcome, LayerInfo, RestoreOptions, RestoreOutcome};
pub use client::Client;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
