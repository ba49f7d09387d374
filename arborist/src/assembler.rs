use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use crate::{
    errors::ArboristError,
    ledger::LedgerRpc,
    registry::RegistryReader,
    scanner::{EventWindowScanner, ScanSession},
    types::{CommitmentRecord, QueueKind, RegistryVersion},
};

/// Turns the next chunk of registered hashes into fully resolved records.
#[derive(Debug)]
pub struct BatchAssembler<L: LedgerRpc> {
    reader: Arc<RegistryReader>,
    scanner: EventWindowScanner<L>,
}

impl<L: LedgerRpc> BatchAssembler<L> {
    pub fn new(reader: Arc<RegistryReader>, scanner: EventWindowScanner<L>) -> Self {
        Self { reader, scanner }
    }

    pub fn reader(&self) -> &Arc<RegistryReader> {
        &self.reader
    }

    pub fn scanner(&self) -> &EventWindowScanner<L> {
        &self.scanner
    }

    /// Records `[processed, processed + chunk_size)` of the current registry,
    /// or `None` when fewer than `chunk_size` leaves are pending.
    pub async fn assemble(
        &self,
        queue: QueueKind,
        processed: u64,
        chunk_size: u64,
        session: &mut ScanSession,
    ) -> Result<Option<Vec<CommitmentRecord>>, ArboristError> {
        let registered = self
            .reader
            .registered_count(RegistryVersion::Current, queue)
            .await?;
        let pending = registered.checked_sub(processed).ok_or_else(|| {
            ArboristError::count_mismatch(
                queue,
                format!("processed {processed} exceeds registered {registered}"),
            )
        })?;
        if pending < chunk_size {
            info!(
                "{} queue has {} pending leaves, less than one chunk of {}",
                queue, pending, chunk_size
            );
            return Ok(None);
        }

        let records = self
            .resolve_range(
                RegistryVersion::Current,
                queue,
                processed,
                processed + chunk_size,
                session,
            )
            .await?;
        debug!(
            "Assembled {} batch [{}, {})",
            queue,
            processed,
            processed + chunk_size
        );
        Ok(Some(records))
    }

    /// Resolves every registered leaf in `[start, end)` of `version`.
    ///
    /// Leaves below the cutover were registered by the legacy registry and
    /// only exist as hashes, so they are matched against source events. Leaves
    /// registered by the current registry are read back from its own data
    /// events. Each record is checked against the stored hash at its index.
    pub async fn resolve_range(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
        start: u64,
        end: u64,
        session: &mut ScanSession,
    ) -> Result<Vec<CommitmentRecord>, ArboristError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let scanned_end = match version {
            RegistryVersion::Legacy => end,
            RegistryVersion::Current => match self.reader.cutover_length(queue).await? {
                Some(cutover) => cutover.clamp(start, end),
                None => end,
            },
        };

        let mut records = Vec::with_capacity((end - start) as usize);
        for index in start..scanned_end {
            let leaf = self.reader.leaf_at(version, queue, index).await?;
            let event = self.scanner.resolve(session, leaf.hash).await?;
            if event.derived_hash() != leaf.hash {
                return Err(ArboristError::integrity(
                    queue,
                    leaf.index,
                    format!("event at block {} does not hash to {}", event.block, leaf.hash),
                ));
            }
            records.push(event.with_index(leaf.index));
        }

        if scanned_end < end {
            let mut announced = self.reader.data_records(queue, scanned_end, end).await?;
            announced.sort_by_key(|record| record.index);
            if announced.len() as u64 != end - scanned_end {
                return Err(ArboristError::count_mismatch(
                    queue,
                    format!(
                        "expected {} data records in [{}, {}), found {}",
                        end - scanned_end,
                        scanned_end,
                        end,
                        announced.len()
                    ),
                ));
            }
            for record in announced {
                let leaf = self.reader.leaf_at(version, queue, record.index).await?;
                if record.derived_hash() != leaf.hash {
                    return Err(ArboristError::integrity(
                        queue,
                        leaf.index,
                        format!("data record does not hash to stored {}", leaf.hash),
                    ));
                }
                records.push(record);
            }
        }

        check_contiguous(queue, start, &records)?;
        Ok(records)
    }
}

fn check_contiguous(
    queue: QueueKind,
    start: u64,
    records: &[CommitmentRecord],
) -> Result<(), ArboristError> {
    if let Some(first) = records.first() {
        if first.index != start {
            return Err(ArboristError::integrity(
                queue,
                first.index,
                format!("expected first index {}", start),
            ));
        }
    }
    if let Some((_, next)) = records
        .iter()
        .tuple_windows()
        .find(|(prev, next)| next.index != prev.index + 1)
    {
        return Err(ArboristError::integrity(
            queue,
            next.index,
            "indices are not contiguous",
        ));
    }
    Ok(())
}
