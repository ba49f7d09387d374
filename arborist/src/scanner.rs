use std::{collections::HashMap, sync::Arc};

use alloy::primitives::{Address, B256};
use futures::future::try_join_all;
use tracing::{debug, info, trace};

use crate::{
    config::SourcesConfig,
    errors::ArboristError,
    ledger::{
        events::{decode_source_event, event_signature},
        LedgerLog, LedgerRpc, LogQuery,
    },
    types::{QueueKind, ResolvedEvent},
    utils::{retry, RetryConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Width of one window in blocks.
    pub step: u64,
    /// Windows searched for one hash before giving up.
    pub max_windows: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step: 500,
            max_windows: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Seen {
    Unique(ResolvedEvent),
    /// Two distinct events produced the same derived hash.
    Ambiguous { first_block: u64, second_block: u64 },
}

impl Seen {
    fn last_block(&self) -> u64 {
        match *self {
            Seen::Unique(event) => event.block,
            Seen::Ambiguous {
                first_block,
                second_block,
            } => first_block.max(second_block),
        }
    }
}

/// Scan progress for one queue. Registry leaves appear in block order, so
/// the windows of a session only ever move forward. Events seen on the way
/// are kept, keyed by derived hash, until a leaf from the same or a later
/// block is resolved.
#[derive(Debug)]
pub struct ScanSession {
    queue: QueueKind,
    start_block: u64,
    cursor: u64,
    seen: HashMap<B256, Seen>,
    windows_scanned: u64,
}

impl ScanSession {
    pub fn new(queue: QueueKind, start_block: u64) -> Self {
        Self {
            queue,
            start_block,
            cursor: start_block,
            seen: HashMap::new(),
            windows_scanned: 0,
        }
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// First block not yet scanned.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn windows_scanned(&self) -> u64 {
        self.windows_scanned
    }

    pub fn events_seen(&self) -> usize {
        self.seen.len()
    }

    fn lookup(&self, hash: &B256) -> Option<Result<ResolvedEvent, ArboristError>> {
        self.seen.get(hash).map(|seen| match *seen {
            Seen::Unique(event) => Ok(event),
            Seen::Ambiguous {
                first_block,
                second_block,
            } => Err(ArboristError::AmbiguousMatch {
                hash: *hash,
                first_block,
                second_block,
            }),
        })
    }

    /// Forgets the event resolved for `hash` and every event from blocks
    /// before `block`.
    fn settle(&mut self, hash: &B256, block: u64) {
        self.seen.remove(hash);
        self.seen.retain(|_, seen| seen.last_block() >= block);
    }

    fn record(&mut self, event: ResolvedEvent) {
        let hash = event.derived_hash();
        match self.seen.get(&hash) {
            None => {
                self.seen.insert(hash, Seen::Unique(event));
            }
            Some(Seen::Unique(first)) => {
                let first_block = first.block;
                self.seen.insert(
                    hash,
                    Seen::Ambiguous {
                        first_block,
                        second_block: event.block,
                    },
                );
            }
            Some(Seen::Ambiguous { .. }) => {}
        }
    }
}

/// Resolves registry hashes back to the source events that produced them by
/// searching the ledger in fixed-size block windows.
#[derive(Debug)]
pub struct EventWindowScanner<L: LedgerRpc> {
    ledger: Arc<L>,
    sources: SourcesConfig,
    config: ScanConfig,
    retry: RetryConfig,
}

impl<L: LedgerRpc> EventWindowScanner<L> {
    pub fn new(
        ledger: Arc<L>,
        sources: SourcesConfig,
        config: ScanConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ledger,
            sources,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Session starting at the configured first block of `queue`.
    pub fn session(&self, queue: QueueKind) -> ScanSession {
        ScanSession::new(queue, self.sources.from_block(queue))
    }

    /// One-off lookup of `target` starting at `from_block`.
    pub async fn find(
        &self,
        queue: QueueKind,
        target: B256,
        from_block: u64,
    ) -> Result<ResolvedEvent, ArboristError> {
        let mut session = ScanSession::new(queue, from_block);
        self.resolve(&mut session, target).await
    }

    /// Returns the event whose derived hash equals `target`, scanning new
    /// windows only when no event seen so far matches.
    pub async fn resolve(
        &self,
        session: &mut ScanSession,
        target: B256,
    ) -> Result<ResolvedEvent, ArboristError> {
        if let Some(found) = session.lookup(&target) {
            let found = found?;
            trace!("Resolved {} from events already seen", target);
            session.settle(&target, found.block);
            return Ok(found);
        }

        let head = retry(&self.retry, "block_number", || self.ledger.block_number()).await?;
        let from_block = session.cursor;
        let mut windows = 0;

        while windows < self.config.max_windows && session.cursor <= head {
            let window_start = session.cursor;
            let window_end = window_start
                .saturating_add(self.config.step)
                .min(head.saturating_add(1));
            let events = self.fetch_window(session.queue, window_start, window_end).await?;

            for event in events {
                session.record(event);
            }
            session.cursor = window_end;
            session.windows_scanned += 1;
            windows += 1;

            if let Some(found) = session.lookup(&target) {
                let found = found?;
                session.settle(&target, found.block);
                debug!(
                    "Resolved {} {} at block {} after {} windows",
                    session.queue, target, found.block, windows
                );
                return Ok(found);
            }
        }

        info!(
            "No {} event for {} in blocks [{}, {}) ({} windows, head {})",
            session.queue, target, from_block, session.cursor, windows, head
        );
        Err(ArboristError::NotFound {
            hash: target,
            from_block,
            to_block: session.cursor,
            windows,
        })
    }

    /// Fetches the events of `[from, to)` from all source contracts of
    /// `queue` concurrently.
    async fn fetch_window(
        &self,
        queue: QueueKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<ResolvedEvent>, ArboristError> {
        let signature = event_signature(queue);
        let instances = self.sources.instances(queue);
        trace!(
            "Scanning {} window [{}, {}) across {} instances",
            queue,
            from,
            to,
            instances.len()
        );

        let futures = instances
            .iter()
            .map(|instance| self.fetch_instance_logs(*instance, signature, from, to));
        let logs = try_join_all(futures).await?;

        let mut events = Vec::new();
        for log in logs.iter().flatten() {
            events.push(decode_source_event(queue, log)?);
        }
        events.sort_by_key(|event| event.block);
        Ok(events)
    }

    async fn fetch_instance_logs(
        &self,
        instance: Address,
        event_signature: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<LedgerLog>, ArboristError> {
        let query = LogQuery {
            addresses: vec![instance],
            event_signature,
            from_block: from,
            to_block: to - 1,
        };
        Ok(retry(&self.retry, "get_logs", || self.ledger.get_logs(&query)).await?)
    }
}
