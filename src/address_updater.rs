//! Per-address polling scheduler.
use crate::address::PaymentAddress;
use crate::codec::IndexerCodec;
use crate::connection::{Inflight, SyncEvent};
use crate::engine::MIN_ADDRESS_POLL;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct AddressRow {
    poll: Duration,
    last_check: Instant,
}

pub(crate) struct AddressUpdater {
    codec: Arc<IndexerCodec>,
    rows: HashMap<PaymentAddress, AddressRow>,
}

impl AddressUpdater {
    pub(crate) fn new(codec: Arc<IndexerCodec>) -> Self {
        Self {
            codec,
            rows: HashMap::new(),
        }
    }

    /// Upsert an address row and query its history immediately.
    /// Intervals below the admissible minimum are clamped.
    pub(crate) fn watch(&mut self, inflight: &mut Inflight, address: PaymentAddress, poll: Duration) {
        let poll = poll.max(MIN_ADDRESS_POLL);
        debug!(%address, ?poll, "watching address");
        self.rows.insert(
            address,
            AddressRow {
                poll,
                last_check: Instant::now(),
            },
        );
        self.query_address(inflight, address);
    }

    /// Re-query every due address; returns the time until the next row
    /// falls due, or `None` when nothing is watched.
    pub(crate) fn wakeup(&mut self, inflight: &mut Inflight) -> Option<Duration> {
        let now = Instant::now();
        let mut next: Option<Duration> = None;
        let mut due = Vec::new();

        for (address, row) in &mut self.rows {
            let elapsed = now.duration_since(row.last_check);
            let remaining = if row.poll <= elapsed {
                row.last_check = now;
                due.push(*address);
                row.poll
            } else {
                row.poll - elapsed
            };
            next = Some(next.map_or(remaining, |n| n.min(remaining)));
        }

        for address in due {
            self.query_address(inflight, address);
        }
        next
    }

    fn query_address(&self, inflight: &mut Inflight, address: PaymentAddress) {
        let codec = Arc::clone(&self.codec);
        inflight.push(
            async move {
                SyncEvent::History {
                    address,
                    // Always a full snapshot; indexers in this
                    // ecosystem are not uniformly incremental.
                    result: codec.fetch_history(&address, 0).await,
                }
            }
            .boxed(),
        );
    }
}
