//! Shared sync entrypoints used by the CLI and the daemon.

use std::sync::Arc;

use treewatch_core::{TransportKind, WatchConfig};

use crate::error::{io_err, TransportError};
use crate::plan::MirrorRoots;
use crate::{LocalTransport, RsyncTransport, TransferReport, Transport};

/// Build the transport selected by `config`.
pub fn transport_for(config: &WatchConfig) -> Arc<dyn Transport> {
    match config.transport {
        TransportKind::Rsync => Arc::new(RsyncTransport::new(&config.rsync_binary)),
        TransportKind::Local => Arc::new(LocalTransport),
    }
}

/// Resolve the roots for `config`: the source is canonicalized (event paths
/// arrive canonical) and the mirror directory is created if missing.
pub fn prepare_roots(config: &WatchConfig) -> Result<MirrorRoots, TransportError> {
    let source = std::fs::canonicalize(&config.source).map_err(|e| io_err(&config.source, e))?;
    std::fs::create_dir_all(&config.mirror).map_err(|e| io_err(&config.mirror, e))?;
    let mirror = std::fs::canonicalize(&config.mirror).map_err(|e| io_err(&config.mirror, e))?;
    Ok(MirrorRoots::new(source, mirror))
}

/// Run one full-tree reconciliation sweep.
///
/// This is the canonical one-shot sync for both `treewatch sync` and tests.
pub fn reconcile(
    roots: &MirrorRoots,
    transport: &dyn Transport,
) -> Result<TransferReport, TransportError> {
    tracing::info!(
        "full reconciliation {} -> {} via {}",
        roots.source.display(),
        roots.mirror.display(),
        transport.name()
    );
    transport.execute(&roots.full_sweep())
}
