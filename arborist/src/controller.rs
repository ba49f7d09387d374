use std::{fmt, sync::Arc};

use arborist_hasher::Hash;
use itertools::Itertools;
use tracing::{debug, error, info, warn};

use crate::{
    assembler::BatchAssembler,
    config::ArboristConfig,
    errors::ArboristError,
    ledger::LedgerRpc,
    mirror::{load_snapshot, save_snapshot, snapshot_path, LocalTreeMirror},
    proof_cache::{ProofCache, ProofCacheEntry, ProofCacheKey},
    prover::{build_public_inputs, BatchProver},
    registry::RegistryReader,
    scanner::{EventWindowScanner, ScanSession},
    types::{Batch, BatchProof, CommitmentRecord, QueueKind, RegistryVersion},
    utils::root_prefix,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    ResolvingBatch,
    AwaitingProof,
    Submitting,
    Verifying,
    Drained,
    Aborted,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::ResolvingBatch => "resolving_batch",
            ControllerState::AwaitingProof => "awaiting_proof",
            ControllerState::Submitting => "submitting",
            ControllerState::Verifying => "verifying",
            ControllerState::Drained => "drained",
            ControllerState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReport {
    pub queue: QueueKind,
    pub batches: u64,
    pub leaves_processed: u64,
    /// Pending leaves left behind, always less than one chunk.
    pub remaining: u64,
    pub final_root: Hash,
    pub proofs_generated: u64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub queues: Vec<QueueReport>,
}

impl MigrationReport {
    pub fn queue(&self, queue: QueueKind) -> Option<&QueueReport> {
        self.queues.iter().find(|report| report.queue == queue)
    }
}

/// Registrations the current registry announced through its data events,
/// counted over `[cutover, end)`.
#[derive(Debug, Default)]
struct ObservedRegistrations {
    end: u64,
    count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentReport {
    pub queue: QueueKind,
    /// Leaves processed without a proof to reach a chunk boundary.
    pub uploaded: u64,
}

/// Drives the queues of the current registry to below one chunk of pending
/// leaves, one proven batch at a time.
///
/// Every batch goes through the same sequence of suspension points:
/// assembling the records, obtaining the proof (cache or prover),
/// submitting, and verifying the registry against the staged mirror. The
/// local mirror only advances once the registry agrees with it.
#[derive(Debug)]
pub struct MigrationController<L: LedgerRpc> {
    config: Arc<ArboristConfig>,
    reader: Arc<RegistryReader>,
    assembler: BatchAssembler<L>,
    prover: Arc<dyn BatchProver>,
    cache: ProofCache,
    state: ControllerState,
}

impl<L: LedgerRpc> MigrationController<L> {
    pub fn new(
        config: Arc<ArboristConfig>,
        reader: Arc<RegistryReader>,
        ledger: Arc<L>,
        prover: Arc<dyn BatchProver>,
        cache: ProofCache,
    ) -> Self {
        let scanner = EventWindowScanner::new(
            ledger,
            config.sources.clone(),
            config.scan,
            config.retry,
        );
        let assembler = BatchAssembler::new(reader.clone(), scanner);
        Self {
            config,
            reader,
            assembler,
            prover,
            cache,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn cache(&self) -> &ProofCache {
        &self.cache
    }

    fn set_state(&mut self, queue: QueueKind, state: ControllerState) {
        debug!("{} controller: {} -> {}", queue, self.state, state);
        self.state = state;
    }

    /// Drains deposits, then withdrawals.
    pub async fn run(&mut self) -> Result<MigrationReport, ArboristError> {
        let mut report = MigrationReport::default();
        for queue in QueueKind::ALL {
            report.queues.push(self.drain_queue(queue).await?);
        }
        Ok(report)
    }

    pub async fn drain_queue(&mut self, queue: QueueKind) -> Result<QueueReport, ArboristError> {
        self.set_state(queue, ControllerState::Idle);
        match self.drain(queue).await {
            Ok(report) => {
                self.set_state(queue, ControllerState::Drained);
                info!(
                    "{} drained: {} batches, {} leaves, {} remaining, root {}",
                    queue,
                    report.batches,
                    report.leaves_processed,
                    report.remaining,
                    root_prefix(&report.final_root)
                );
                Ok(report)
            }
            Err(e) => {
                error!("{} aborted in state {}: {}", queue, self.state, e);
                self.state = ControllerState::Aborted;
                Err(e)
            }
        }
    }

    async fn drain(&mut self, queue: QueueKind) -> Result<QueueReport, ArboristError> {
        let chunk_size = self.config.chunk_size;
        let mut session = self.assembler.scanner().session(queue);
        let mut mirror = self.open_mirror(queue)?;
        self.sync_mirror(queue, &mut mirror, &mut session).await?;
        let mut observed = ObservedRegistrations::default();

        let mut report = QueueReport {
            queue,
            batches: 0,
            leaves_processed: 0,
            remaining: 0,
            final_root: mirror.root(),
            proofs_generated: 0,
            cache_hits: 0,
        };

        loop {
            self.set_state(queue, ControllerState::ResolvingBatch);
            let processed = self
                .reader
                .processed_count(RegistryVersion::Current, queue)
                .await?;
            self.check_counts(queue, processed, &mirror, &mut observed).await?;
            if processed % chunk_size != 0 {
                return Err(ArboristError::UnalignedQueue {
                    queue,
                    processed,
                    chunk_size,
                });
            }
            let Some(records) = self
                .assembler
                .assemble(queue, processed, chunk_size, &mut session)
                .await?
            else {
                break;
            };

            self.set_state(queue, ControllerState::AwaitingProof);
            let (batch, staged) = stage(queue, &mirror, records)?;
            let key = ProofCacheKey {
                queue,
                old_root: batch.old_root,
                new_root: batch.new_root,
            };
            let proof = match self.cache.get(&key) {
                Some(proof) => {
                    info!(
                        "Using cached proof for {} batch at {} ({} -> {})",
                        queue,
                        batch.start_index,
                        root_prefix(&batch.old_root),
                        root_prefix(&batch.new_root)
                    );
                    report.cache_hits += 1;
                    proof.clone()
                }
                None => {
                    let inputs = build_public_inputs(&mirror, &batch, self.config.chunk_height())?;
                    info!("Generating proof for {} batch at {}", queue, batch.start_index);
                    let proof = self.prover.prove(&inputs).await?;
                    report.proofs_generated += 1;
                    BatchProof {
                        proof,
                        args: inputs.submission_args(),
                    }
                }
            };

            self.set_state(queue, ControllerState::Submitting);
            self.submit(queue, processed, &proof).await?;

            self.set_state(queue, ControllerState::Verifying);
            self.verify(queue, processed, &staged).await?;

            mirror = staged;
            self.cache.put(ProofCacheEntry { key, proof })?;
            self.persist(queue, &mirror)?;
            report.batches += 1;
            report.leaves_processed += chunk_size;
            info!(
                "{} batch [{}, {}) committed, root {}",
                queue,
                processed,
                processed + chunk_size,
                root_prefix(&mirror.root())
            );
        }

        report.remaining = self
            .reader
            .pending_length(RegistryVersion::Current, queue)
            .await?;
        report.final_root = mirror.root();
        Ok(report)
    }

    fn open_mirror(&self, queue: QueueKind) -> Result<LocalTreeMirror, ArboristError> {
        if let Some(dir) = &self.config.snapshot_dir {
            if let Some(mirror) = load_snapshot(&snapshot_path(dir, queue))? {
                return Ok(mirror);
            }
        }
        Ok(LocalTreeMirror::new_empty()?)
    }

    fn persist(&self, queue: QueueKind, mirror: &LocalTreeMirror) -> Result<(), ArboristError> {
        match &self.config.snapshot_dir {
            Some(dir) => save_snapshot(mirror, &snapshot_path(dir, queue)),
            None => Ok(()),
        }
    }

    /// Replays already processed leaves into `mirror` and checks the result
    /// against the registry root.
    async fn sync_mirror(
        &mut self,
        queue: QueueKind,
        mirror: &mut LocalTreeMirror,
        session: &mut ScanSession,
    ) -> Result<(), ArboristError> {
        let processed = self
            .reader
            .processed_count(RegistryVersion::Current, queue)
            .await?;
        let next_index = mirror.next_index();
        if next_index > processed {
            return Err(ArboristError::count_mismatch(
                queue,
                format!("mirror holds {next_index} leaves, registry processed {processed}"),
            ));
        }
        if next_index < processed {
            info!(
                "Catching up {} mirror from {} to {}",
                queue, next_index, processed
            );
            let records = self
                .assembler
                .resolve_range(
                    RegistryVersion::Current,
                    queue,
                    next_index,
                    processed,
                    session,
                )
                .await?;
            let leaves = leaf_hashes(&records)?;
            mirror.bulk_insert(&leaves)?;
        }

        let remote = self.reader.root(RegistryVersion::Current, queue).await?;
        if remote != mirror.root() {
            return Err(ArboristError::root_mismatch(queue, &mirror.root(), &remote));
        }
        if next_index < processed {
            self.persist(queue, mirror)?;
        }
        debug!(
            "{} mirror in sync at {} with root {}",
            queue,
            processed,
            root_prefix(&remote)
        );
        Ok(())
    }

    /// Cross-registry count checks performed before every batch. Leaves
    /// registered since the cutover are only counted once their data event
    /// has been seen.
    async fn check_counts(
        &self,
        queue: QueueKind,
        processed: u64,
        mirror: &LocalTreeMirror,
        observed: &mut ObservedRegistrations,
    ) -> Result<(), ArboristError> {
        if mirror.next_index() != processed {
            return Err(ArboristError::count_mismatch(
                queue,
                format!(
                    "mirror at {} but registry processed {}",
                    mirror.next_index(),
                    processed
                ),
            ));
        }
        if !self.reader.is_migrating() {
            return Ok(());
        }

        let legacy_registered = self
            .reader
            .registered_count(RegistryVersion::Legacy, queue)
            .await?;
        let cutover = self.reader.cutover_length(queue).await?.ok_or_else(|| {
            ArboristError::count_mismatch(queue, "current registry reports no cutover length")
        })?;
        if legacy_registered != cutover {
            return Err(ArboristError::count_mismatch(
                queue,
                format!("legacy registered {legacy_registered}, cutover {cutover}"),
            ));
        }

        let legacy_processed = self
            .reader
            .processed_count(RegistryVersion::Legacy, queue)
            .await?;
        if processed < legacy_processed {
            return Err(ArboristError::count_mismatch(
                queue,
                format!("current processed {processed} behind legacy processed {legacy_processed}"),
            ));
        }

        let registered = self
            .reader
            .registered_count(RegistryVersion::Current, queue)
            .await?;
        if registered < cutover {
            return Err(ArboristError::count_mismatch(
                queue,
                format!("current registered {registered} below cutover {cutover}"),
            ));
        }
        let from = observed.end.max(cutover);
        if registered > from {
            let announced = self.reader.data_records(queue, from, registered).await?;
            observed.count += announced.iter().map(|record| record.index).unique().count() as u64;
            observed.end = registered;
        }

        let pending = self
            .reader
            .pending_length(RegistryVersion::Current, queue)
            .await?;
        if processed + pending != legacy_registered + observed.count {
            return Err(ArboristError::count_mismatch(
                queue,
                format!(
                    "processed {processed} + pending {pending} != legacy {legacy_registered} + announced {}",
                    observed.count
                ),
            ));
        }
        Ok(())
    }

    /// Submits once. A failed submission that nevertheless advanced the
    /// registry by one chunk is treated as landed.
    async fn submit(
        &self,
        queue: QueueKind,
        processed: u64,
        proof: &BatchProof,
    ) -> Result<(), ArboristError> {
        let contract = self.reader.contract(RegistryVersion::Current)?;
        let error = match contract.apply_batch(queue, proof).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        warn!(
            "{} submission at {} returned an error, checking whether it landed: {}",
            queue, processed, error
        );
        let now = self
            .reader
            .processed_count(RegistryVersion::Current, queue)
            .await?;
        if now == processed + self.config.chunk_size {
            warn!("{} submission at {} landed despite the error", queue, processed);
            Ok(())
        } else {
            Err(ArboristError::Submission {
                queue,
                start_index: processed,
                error,
            })
        }
    }

    async fn verify(
        &self,
        queue: QueueKind,
        processed: u64,
        staged: &LocalTreeMirror,
    ) -> Result<(), ArboristError> {
        let remote = self.reader.root(RegistryVersion::Current, queue).await?;
        if remote != staged.root() {
            return Err(ArboristError::root_mismatch(queue, &staged.root(), &remote));
        }
        let now = self
            .reader
            .processed_count(RegistryVersion::Current, queue)
            .await?;
        let expected = processed + self.config.chunk_size;
        if now != expected {
            return Err(ArboristError::count_mismatch(
                queue,
                format!("processed {now} after batch, expected {expected}"),
            ));
        }
        Ok(())
    }

    /// Processes just enough legacy leaves without a proof for both legacy
    /// queues to end on a chunk boundary.
    pub async fn align_legacy(&mut self) -> Result<Vec<AlignmentReport>, ArboristError> {
        let chunk_size = self.config.chunk_size;
        let legacy = self.reader.contract(RegistryVersion::Legacy)?.clone();
        let mut reports = Vec::with_capacity(QueueKind::ALL.len());

        for queue in QueueKind::ALL {
            let processed = self
                .reader
                .processed_count(RegistryVersion::Legacy, queue)
                .await?;
            let offset = processed % chunk_size;
            if offset == 0 {
                info!("Legacy {} already aligned at {}", queue, processed);
                reports.push(AlignmentReport { queue, uploaded: 0 });
                continue;
            }

            let needed = chunk_size - offset;
            let pending = self
                .reader
                .pending_length(RegistryVersion::Legacy, queue)
                .await?;
            if pending < needed {
                warn!(
                    "Legacy {} needs {} leaves to align but only {} are pending, skipping",
                    queue, needed, pending
                );
                reports.push(AlignmentReport { queue, uploaded: 0 });
                continue;
            }

            let mut session = self.assembler.scanner().session(queue);
            let records = self
                .assembler
                .resolve_range(
                    RegistryVersion::Legacy,
                    queue,
                    processed,
                    processed + needed,
                    &mut session,
                )
                .await?;
            info!(
                "Aligning legacy {}: processing [{}, {}) without proof",
                queue,
                processed,
                processed + needed
            );
            legacy
                .apply_unproven(queue, &records)
                .await
                .map_err(|error| ArboristError::Submission {
                    queue,
                    start_index: processed,
                    error,
                })?;

            let now = self
                .reader
                .processed_count(RegistryVersion::Legacy, queue)
                .await?;
            if now != processed + needed {
                return Err(ArboristError::count_mismatch(
                    queue,
                    format!("legacy processed {now} after alignment, expected {}", processed + needed),
                ));
            }
            reports.push(AlignmentReport {
                queue,
                uploaded: needed,
            });
        }
        Ok(reports)
    }
}

fn leaf_hashes(records: &[CommitmentRecord]) -> Result<Vec<Hash>, ArboristError> {
    records
        .iter()
        .map(|record| record.leaf_hash().map_err(ArboristError::from))
        .collect()
}

/// Appends `records` to a copy of `mirror`.
fn stage(
    queue: QueueKind,
    mirror: &LocalTreeMirror,
    records: Vec<CommitmentRecord>,
) -> Result<(Batch, LocalTreeMirror), ArboristError> {
    let mut staged = mirror.clone();
    staged.bulk_insert(&leaf_hashes(&records)?)?;
    let batch = Batch {
        queue,
        start_index: mirror.next_index(),
        records,
        old_root: mirror.root(),
        new_root: staged.root(),
    };
    Ok((batch, staged))
}
