//! Read path: bounded replay of the position topic.
//!
//! A fresh consumer group starts with no committed offsets, so without help
//! it would read the whole topic. [`SeekOnAssign`] moves each newly assigned
//! partition back from its end by the replay depth, and [`ReplayReader`]
//! drains whatever is left until the broker stops returning data.

use crate::{
    config::ReplayHalt,
    error::BrokerError,
    logic::Deserializable,
    stream::{LogConsumer, PartitionCursor, RebalanceListener, Record, TopicPartition},
};

use std::time::Duration;

use tracing::{debug, info, trace, warn};

/// Rebalance listener that rewinds assigned partitions to their last `depth` records.
///
/// Built once per subscription and never mutated, so a later rebalance sees
/// the same depth as the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOnAssign {
    depth: u64,
}

impl SeekOnAssign {
    pub fn new(depth: u64) -> Self {
        Self { depth }
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Where a partition ending at `end_offset` should be read from, if anywhere.
    ///
    /// `None` when the partition holds fewer records than the depth.
    pub fn seek_target(&self, end_offset: i64) -> Option<i64> {
        let depth = i64::try_from(self.depth).unwrap_or(i64::MAX);
        let target = end_offset.saturating_sub(depth);
        (target >= 0).then_some(target)
    }
}

impl RebalanceListener for SeekOnAssign {
    fn on_partitions_assigned(
        &self,
        cursor: &mut dyn PartitionCursor,
        partitions: &[TopicPartition],
    ) {
        for partition in partitions {
            let end_offset = match cursor.end_offset(partition) {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(
                        partition = %partition,
                        error = %e,
                        "cannot read end offset, not seeking"
                    );
                    continue;
                }
            };

            match self.seek_target(end_offset) {
                Some(target) => {
                    debug!(
                        partition = %partition,
                        end_offset,
                        target,
                        "seeking partition for replay"
                    );
                    if let Err(e) = cursor.seek(partition, target) {
                        warn!(
                            partition = %partition,
                            target,
                            error = %e,
                            "failed to seek partition"
                        );
                    }
                }
                None => {
                    info!(
                        partition = %partition,
                        end_offset,
                        depth = self.depth,
                        "ignoring the seek because the initial offset is negative"
                    );
                }
            }
        }
    }
}

/// Polls until a non-empty batch arrives or `retries` consecutive polls come back empty.
///
/// Worst case this blocks for `retries * timeout`.
pub fn poll_with_retries<C>(
    consumer: &mut C,
    timeout: Duration,
    retries: u32,
) -> Result<Vec<Record>, BrokerError>
where
    C: LogConsumer + ?Sized,
{
    for _ in 0..retries {
        let records = consumer.poll(timeout)?;
        if !records.is_empty() {
            return Ok(records);
        }
    }

    Ok(Vec::new())
}

/// Counters describing a finished replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Non-empty batches received.
    pub batches: usize,
    /// Records handed to the deserializer.
    pub records: usize,
    /// Whether the deserializer asked to stop at least once.
    pub halted: bool,
}

/// Drains a subscribed consumer into a deserializer.
pub struct ReplayReader<'a, C: ?Sized> {
    consumer: &'a mut C,
    poll_timeout: Duration,
    retry_count: u32,
    halt: ReplayHalt,
}

impl<'a, C> ReplayReader<'a, C>
where
    C: LogConsumer + ?Sized,
{
    pub fn new(
        consumer: &'a mut C,
        poll_timeout: Duration,
        retry_count: u32,
        halt: ReplayHalt,
    ) -> Self {
        Self {
            consumer,
            poll_timeout,
            retry_count,
            halt,
        }
    }

    /// Runs the replay loop.
    ///
    /// Each batch is fed to `deserializer` record by record. The loop ends when
    /// a poll with retries comes back empty. A `false` from the deserializer
    /// skips the rest of the batch, and with [`ReplayHalt::Replay`] also ends
    /// the loop.
    pub fn run(
        &mut self,
        deserializer: &mut dyn Deserializable,
    ) -> Result<ReplayStats, BrokerError> {
        let mut stats = ReplayStats::default();

        loop {
            let records =
                poll_with_retries(&mut *self.consumer, self.poll_timeout, self.retry_count)?;
            if records.is_empty() {
                break;
            }

            stats.batches += 1;
            debug!(records = records.len(), "replaying batch");

            let mut halted = false;
            for record in &records {
                trace!(partition = record.partition, offset = record.offset, "read from topic");

                stats.records += 1;
                if !deserializer.deserialize(&record.key, &record.value) {
                    halted = true;
                    break;
                }
            }

            if halted {
                stats.halted = true;
                if self.halt == ReplayHalt::Replay {
                    debug!("deserializer requested stop, ending replay");
                    break;
                }
            }
        }

        Ok(stats)
    }
}
