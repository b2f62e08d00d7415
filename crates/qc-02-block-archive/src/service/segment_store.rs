//! # Segment Store
//!
//! The local write path of one channel: appends framed blocks to the open
//! segment, rolls to a new segment at the size threshold and keeps an
//! in-memory index of where every local block lives.
//!
//! ## Recovery
//!
//! `open` rebuilds the index by scanning the local segments with
//! [`SegmentChainReader`], one contiguous run at a time (archived segments
//! may have been discarded in between). A torn record at the tail of the
//! highest segment is cut off and appends resume at its start offset. A
//! torn record anywhere else is corruption. The height never falls below
//! what the archive index has seen finalized, so discarding every segment
//! but an empty head does not rewind the chain.
//!
//! [`SegmentStore::open_read_only`] scans the same way without touching the
//! directory, for inspecting a channel another process is writing.

use crate::domain::chain::SegmentChainReader;
use crate::domain::config::SegmentStoreConfig;
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::framing::encode_record;
use crate::domain::segment::{list_segments, segment_path, RecordPlacement, SegmentReader};
use crate::ports::outbound::{ArchiveIndex, ChainView};
use crate::service::iterator::CommitSignal;
use crate::service::queue::ArchiveNotifier;
use parking_lot::RwLock;
use shared_bus::ArchiveNotification;
use shared_types::{Block, Hash};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// STATE
// =============================================================================

#[derive(Default)]
struct StoreState {
    writer: Option<File>,
    open_segment: u64,
    open_size: u64,
    /// Number of committed blocks.
    height: u64,
    latest_config: Option<u64>,
    /// Block number -> placement, for blocks scanned or written locally.
    placements: BTreeMap<u64, RecordPlacement>,
    by_hash: HashMap<Hash, u64>,
    /// Transaction id -> (block number, position in block).
    txs: HashMap<String, (u64, usize)>,
}

impl StoreState {
    fn index_block(&mut self, block: &Block, placement: RecordPlacement) {
        let number = block.number();
        self.placements.insert(number, placement);
        self.by_hash.insert(block.header.hash(), number);
        for (pos, env) in block.data.iter().enumerate() {
            self.txs.insert(env.tx_id.clone(), (number, pos));
        }
        self.height = number + 1;
        self.latest_config = Some(block.metadata.last_config_index);
    }
}

/// How recovery may touch the channel directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Cut torn tails, record segment ends, open the head for append.
    Repair,
    /// Scan only.
    Inspect,
}

/// Local segment storage for one channel.
pub struct SegmentStore {
    channel_id: String,
    dir: PathBuf,
    config: SegmentStoreConfig,
    index: Arc<dyn ArchiveIndex>,
    notifier: Option<ArchiveNotifier>,
    commit: Arc<CommitSignal>,
    state: RwLock<StoreState>,
}

impl SegmentStore {
    /// Open (or create) the channel's segment directory and recover.
    pub fn open(
        config: SegmentStoreConfig,
        channel_id: impl Into<String>,
        index: Arc<dyn ArchiveIndex>,
    ) -> ArchiveResult<Self> {
        let channel_id = channel_id.into();
        let dir = config.channel_dir(&channel_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ArchiveError::io(format!("create {}", dir.display()), e))?;
        Self::recover_into(config, channel_id, dir, index, Recovery::Repair)
    }

    /// Open without modifying anything on disk. Appends, rolls and removals
    /// fail with `ReadOnly`.
    pub fn open_read_only(
        config: SegmentStoreConfig,
        channel_id: impl Into<String>,
        index: Arc<dyn ArchiveIndex>,
    ) -> ArchiveResult<Self> {
        let channel_id = channel_id.into();
        let dir = config.channel_dir(&channel_id);
        Self::recover_into(config, channel_id, dir, index, Recovery::Inspect)
    }

    fn recover_into(
        config: SegmentStoreConfig,
        channel_id: String,
        dir: PathBuf,
        index: Arc<dyn ArchiveIndex>,
        mode: Recovery,
    ) -> ArchiveResult<Self> {
        let state = recover(&channel_id, &dir, index.as_ref(), mode)?;
        info!(
            channel = %channel_id,
            height = state.height,
            open_segment = state.open_segment,
            open_size = state.open_size,
            read_only = state.writer.is_none(),
            "[qc-02] Segment store opened"
        );

        let commit = Arc::new(CommitSignal::new(state.height));
        Ok(Self {
            channel_id,
            dir,
            config,
            index,
            notifier: None,
            commit,
            state: RwLock::new(state),
        })
    }

    /// Post finalized-segment notifications to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: ArchiveNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.read().writer.is_none()
    }

    fn read_only(&self) -> ArchiveError {
        ArchiveError::ReadOnly {
            channel: self.channel_id.clone(),
        }
    }

    /// Committed-height signal for blocking readers.
    #[must_use]
    pub fn commit_signal(&self) -> Arc<CommitSignal> {
        Arc::clone(&self.commit)
    }

    /// Append the next block.
    pub fn append_block(&self, block: &Block) -> ArchiveResult<RecordPlacement> {
        let payload = block.to_bytes().map_err(ArchiveError::serialization)?;
        let mut framed = Vec::with_capacity(payload.len() + 10);
        encode_record(&mut framed, &payload);
        let prefix_len = (framed.len() - payload.len()) as u64;

        let (placement, height, finalized) = {
            let mut state = self.state.write();
            if state.writer.is_none() {
                return Err(self.read_only());
            }
            if block.number() != state.height {
                return Err(ArchiveError::OutOfOrderBlock {
                    expected: state.height,
                    got: block.number(),
                });
            }

            let finalized = if state.open_size > 0
                && state.open_size + framed.len() as u64 > self.config.max_segment_size
            {
                Some(self.roll_locked(&mut state)?)
            } else {
                None
            };

            let path = segment_path(&self.dir, state.open_segment);
            let sync = self.config.sync_writes;
            let open_size = state.open_size;
            let channel_id = &self.channel_id;
            let writer = state.writer.as_mut().ok_or_else(|| self.read_only())?;
            if let Err(e) = writer.write_all(&framed) {
                // Cut the partial record so the next append starts on a boundary.
                if let Err(rollback) = writer.set_len(open_size) {
                    error!(
                        channel = %channel_id,
                        path = %path.display(),
                        offset = open_size,
                        error = %rollback,
                        "[qc-02] Partial record not cut; recovery will truncate it"
                    );
                }
                return Err(ArchiveError::io(format!("append {}", path.display()), e));
            }
            if sync {
                writer
                    .sync_data()
                    .map_err(|e| ArchiveError::io(format!("sync {}", path.display()), e))?;
            }

            let placement = RecordPlacement {
                segment: state.open_segment,
                record_start_offset: state.open_size,
                payload_offset: state.open_size + prefix_len,
            };
            state.open_size += framed.len() as u64;
            state.index_block(block, placement);
            (placement, state.height, finalized)
        };

        self.commit.advance(height);
        if let Some(segment) = finalized {
            self.post_finalized(segment);
        }
        debug!(
            channel = %self.channel_id,
            block = block.number(),
            segment = placement.segment,
            offset = placement.record_start_offset,
            "[qc-02] Block appended"
        );
        Ok(placement)
    }

    /// Finalize the open segment now, if it holds any block.
    ///
    /// Returns the finalized segment number.
    pub fn roll_segment(&self) -> ArchiveResult<Option<u64>> {
        let finalized = {
            let mut state = self.state.write();
            if state.writer.is_none() {
                return Err(self.read_only());
            }
            if state.open_size == 0 {
                return Ok(None);
            }
            self.roll_locked(&mut state)?
        };
        self.post_finalized(finalized);
        Ok(Some(finalized))
    }

    /// The old writer is replaced only after the next segment is open and
    /// the end block is indexed, so a failed roll leaves the store appending
    /// to the same, still unfinalized, segment.
    fn roll_locked(&self, state: &mut StoreState) -> ArchiveResult<u64> {
        let finalized = state.open_segment;
        let end_block = state.height.saturating_sub(1);
        let path = segment_path(&self.dir, finalized);
        state
            .writer
            .as_ref()
            .ok_or_else(|| self.read_only())?
            .sync_all()
            .map_err(|e| ArchiveError::io(format!("sync {}", path.display()), e))?;

        let next = finalized + 1;
        let next_writer = open_for_append(&segment_path(&self.dir, next))?;
        self.index.record_segment_end_block(finalized, end_block)?;
        state.writer = Some(next_writer);
        state.open_segment = next;
        state.open_size = 0;

        info!(
            channel = %self.channel_id,
            segment = finalized,
            end_block,
            "[qc-02] Segment finalized"
        );
        Ok(finalized)
    }

    fn post_finalized(&self, segment: u64) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(ArchiveNotification::new(self.channel_id.clone(), segment));
        }
    }

    /// Read a block from local storage.
    ///
    /// ## Errors
    ///
    /// - `BlockNotFound`: not indexed locally (never written here, or
    ///   discarded before the last restart)
    /// - `SegmentNotFound`: its segment was discarded
    pub fn block_by_number(&self, number: u64) -> ArchiveResult<Block> {
        let placement = self
            .state
            .read()
            .placements
            .get(&number)
            .copied()
            .ok_or_else(|| ArchiveError::BlockNotFound {
                channel: self.channel_id.clone(),
                number,
            })?;

        let path = segment_path(&self.dir, placement.segment);
        let mut reader =
            SegmentReader::open(&path, placement.segment, placement.record_start_offset)?;
        let (payload, _) = reader
            .next_record()?
            .ok_or_else(|| ArchiveError::BlockNotFound {
                channel: self.channel_id.clone(),
                number,
            })?;
        let block = Block::from_bytes(&payload).map_err(|e| ArchiveError::Corruption {
            channel: self.channel_id.clone(),
            segment: placement.segment,
            reason: format!("block {number}: {e}"),
        })?;
        if block.number() != number {
            return Err(ArchiveError::Corruption {
                channel: self.channel_id.clone(),
                segment: placement.segment,
                reason: format!(
                    "expected block {number} at offset {}, found {}",
                    placement.record_start_offset,
                    block.number()
                ),
            });
        }
        Ok(block)
    }

    /// Whether block `number` can be served without the network.
    #[must_use]
    pub fn has_local_block(&self, number: u64) -> bool {
        self.state
            .read()
            .placements
            .get(&number)
            .is_some_and(|p| segment_path(&self.dir, p.segment).exists())
    }

    #[must_use]
    pub fn block_number_by_hash(&self, hash: &Hash) -> Option<u64> {
        self.state.read().by_hash.get(hash).copied()
    }

    /// Block number and position of a locally indexed transaction.
    #[must_use]
    pub fn tx_location(&self, tx_id: &str) -> Option<(u64, usize)> {
        self.state.read().txs.get(tx_id).copied()
    }

    #[must_use]
    pub fn placement(&self, number: u64) -> Option<RecordPlacement> {
        self.state.read().placements.get(&number).copied()
    }
}

impl ChainView for SegmentStore {
    fn chain_height(&self) -> u64 {
        self.state.read().height
    }

    fn latest_config_block(&self) -> Option<u64> {
        self.state.read().latest_config
    }

    fn local_segments(&self) -> ArchiveResult<Vec<u64>> {
        list_segments(&self.dir)
    }

    fn open_segment(&self) -> u64 {
        self.state.read().open_segment
    }

    fn remove_segment(&self, segment: u64) -> ArchiveResult<bool> {
        if self.is_read_only() {
            return Err(self.read_only());
        }
        if segment == self.open_segment() {
            return Err(ArchiveError::SegmentNotFinalized {
                channel: self.channel_id.clone(),
                segment,
            });
        }
        let path = segment_path(&self.dir, segment);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(channel = %self.channel_id, segment, "[qc-02] Local segment removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ArchiveError::io(format!("remove {}", path.display()), e)),
        }
    }
}

// =============================================================================
// RECOVERY
// =============================================================================

fn open_for_append(path: &Path) -> ArchiveResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ArchiveError::io(format!("open {}", path.display()), e))
}

/// Split ascending segment numbers into contiguous runs.
fn contiguous_runs(segments: &[u64]) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &segment in segments {
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == segment => *end = segment,
            _ => runs.push((segment, segment)),
        }
    }
    runs
}

fn recover(
    channel_id: &str,
    dir: &Path,
    index: &dyn ArchiveIndex,
    mode: Recovery,
) -> ArchiveResult<StoreState> {
    let segments = list_segments(dir)?;
    let mut state = StoreState::default();
    let repair = mode == Recovery::Repair;
    let last_indexed = index.segments()?.last().copied();

    let Some(&highest) = segments.last() else {
        // An empty channel continues after whatever was already archived
        // and discarded.
        let first = match last_indexed {
            Some((segment, end)) => {
                state.height = end + 1;
                segment + 1
            }
            None => 0,
        };
        if repair {
            state.writer = Some(open_for_append(&segment_path(dir, first))?);
        }
        state.open_segment = first;
        return Ok(state);
    };

    let mut torn_at = None;
    for (start, end) in contiguous_runs(&segments) {
        let mut reader = SegmentChainReader::open(dir, start, 0, Some(end))?;
        let mut last_in_segment: Option<(u64, u64)> = None;

        loop {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(ArchiveError::UnexpectedEndOfSegment { segment, offset })
                    if segment == highest =>
                {
                    if repair {
                        truncate_torn_tail(dir, segment, offset)?;
                    } else {
                        debug!(
                            channel = channel_id,
                            segment,
                            offset,
                            "[qc-02] Incomplete record at head, scan stops before it"
                        );
                    }
                    torn_at = Some(offset);
                    break;
                }
                Err(e @ ArchiveError::UnexpectedEndOfSegment { .. })
                | Err(e @ ArchiveError::MalformedLength { .. }) => {
                    let segment = reader.current_segment();
                    return Err(ArchiveError::Corruption {
                        channel: channel_id.to_string(),
                        segment,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };

            let (payload, placement) = record;
            let block = Block::from_bytes(&payload).map_err(|e| ArchiveError::Corruption {
                channel: channel_id.to_string(),
                segment: placement.segment,
                reason: format!(
                    "undecodable block at offset {}: {e}",
                    placement.record_start_offset
                ),
            })?;

            if let Some((segment, end_block)) = last_in_segment {
                if repair && segment != placement.segment && segment != highest {
                    index.record_segment_end_block(segment, end_block)?;
                }
            }
            last_in_segment = Some((placement.segment, block.number()));
            state.index_block(&block, placement);
        }

        if let Some((segment, end_block)) = last_in_segment {
            if repair && segment != highest {
                index.record_segment_end_block(segment, end_block)?;
            }
        }
    }

    // Blocks of discarded segments are gone from disk but not from the chain.
    if let Some((segment, end)) = last_indexed {
        if end + 1 > state.height {
            info!(
                channel = channel_id,
                segment,
                end_block = end,
                scanned_height = state.height,
                "[qc-02] Height restored from the archive index"
            );
            state.height = end + 1;
        }
    }

    // A crash between finalizing the head and creating its successor leaves
    // the head already indexed; appends go to a fresh segment.
    let head = match last_indexed {
        Some((segment, _)) if segment >= highest => segment + 1,
        _ => highest,
    };

    state.open_segment = head;
    if repair {
        let path = segment_path(dir, head);
        let writer = open_for_append(&path)?;
        state.open_size = writer
            .metadata()
            .map_err(|e| ArchiveError::io(format!("stat {}", path.display()), e))?
            .len();
        state.writer = Some(writer);
    } else if head == highest {
        let path = segment_path(dir, head);
        state.open_size = match torn_at {
            Some(offset) => offset,
            None => std::fs::metadata(&path)
                .map_err(|e| ArchiveError::io(format!("stat {}", path.display()), e))?
                .len(),
        };
    }
    Ok(state)
}

fn truncate_torn_tail(dir: &Path, segment: u64, offset: u64) -> ArchiveResult<()> {
    let path = segment_path(dir, segment);
    warn!(
        segment,
        offset, "[qc-02] Torn record at segment tail, truncating"
    );
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|e| ArchiveError::io(format!("open {}", path.display()), e))?;
    file.set_len(offset)
        .and_then(|()| file.sync_all())
        .map_err(|e| ArchiveError::io(format!("truncate {}", path.display()), e))
}
