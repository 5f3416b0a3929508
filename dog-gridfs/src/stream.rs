//! Seekable, unbuffered byte stream over one stored object.
//!
//! A [`BlobStream`] is bound to a key and a store. Nothing touches the store
//! until [`open`](BlobStream::open); channels are created on the first read or
//! write and released together by [`close`](BlobStream::close).
//!
//! ```text
//!   Unopened ──open──▶ Open { mode, read channel?, write channel? } ──close──▶ Closed
//!       ▲                 │                                                      │
//!       └─ open refused ◀─┘                       open again ◀──────────────────┘
//! ```
//!
//! The logical offset is tracked by the stream. The download channel is
//! sequential, so the stream also tracks where that channel actually is and
//! reconciles the two before every read: forward gaps are skipped in bounded
//! batches, backward gaps reopen the channel.
//!
//! Writing replaces: the first write deletes every object stored under the key
//! before the upload channel is opened, so a key never maps to two records.
//! Two streams writing the same key at the same time are not coordinated;
//! both may see "no object" and both upload. Serialise writers per key above
//! this layer if that matters.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::sniff::sniff_extension;
use crate::{
    BlobError, BlobKey, BlobResult, BlobStat, ModeViolation, ObjectRecord, ObjectStore,
    ReadChannel, StoreConfig, StreamMode, UploadMetadata, WriteChannel,
};

/// Largest logical offset a stream will hold
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// Why a stream call did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOp {
    /// `open` has not succeeded since creation or the last `close`
    NotOpened,
    /// Read on a stream opened without read capability
    NotReadable,
    /// Write on a stream opened without write capability
    NotWritable,
    /// Zero bytes requested
    EmptyRequest,
    /// The object does not exist, there is nothing to read
    Missing,
}

/// Result of one stream I/O call.
///
/// Benign no-ops and channel failures are told apart here even though both
/// collapse to the same observable value (empty bytes, zero written) through
/// [`into_value`](IoOutcome::into_value).
#[derive(Debug)]
pub enum IoOutcome<T> {
    /// The call reached the channel
    Done(T),
    /// Nothing was attempted
    NoOp(NoOp),
    /// The channel failed; the logical offset is unchanged
    Failed(BlobError),
}

impl<T> IoOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, IoOutcome::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, IoOutcome::Failed(_))
    }

    /// The no-op reason, if this was one
    pub fn no_op(&self) -> Option<NoOp> {
        match self {
            IoOutcome::NoOp(reason) => Some(*reason),
            _ => None,
        }
    }

    /// The payload of a successful call
    pub fn done(self) -> Option<T> {
        match self {
            IoOutcome::Done(value) => Some(value),
            _ => None,
        }
    }

    /// Convert to a `Result`, treating a no-op as an empty success
    pub fn into_result(self) -> BlobResult<T>
    where
        T: Default,
    {
        match self {
            IoOutcome::Done(value) => Ok(value),
            IoOutcome::NoOp(_) => Ok(T::default()),
            IoOutcome::Failed(err) => Err(err),
        }
    }
}

impl<T: Default> IoOutcome<T> {
    /// Flatten to the plain value: the payload, or empty/zero otherwise
    pub fn into_value(self) -> T {
        self.done().unwrap_or_default()
    }
}

/// Lifecycle phase of a [`BlobStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Unopened,
    Open,
    Closed,
}

/// A live channel handed out by [`BlobStream::cast`]
pub enum ChannelHandle<'a> {
    Read(&'a mut dyn ReadChannel),
    Write(&'a mut dyn WriteChannel),
}

/// Download channel plus where it actually is in the object
struct ReadCursor {
    channel: Box<dyn ReadChannel>,
    position: u64,
    /// False once the raw channel has been lent out and may have moved
    trusted: bool,
}

impl ReadCursor {
    fn new(channel: Box<dyn ReadChannel>) -> Self {
        Self {
            channel,
            position: 0,
            trusted: true,
        }
    }

    fn usable_for(&self, target: u64) -> bool {
        self.trusted && self.position <= target
    }
}

enum State {
    Unopened,
    Open {
        mode: StreamMode,
        read: Option<ReadCursor>,
        write: Option<Box<dyn WriteChannel>>,
    },
    Closed,
}

/// Stateful, seekable stream bound to one key
pub struct BlobStream {
    store: Arc<dyn ObjectStore>,
    key: BlobKey,
    skip_batch_bytes: usize,
    offset: u64,
    /// Snapshot from the last successful `open`; `None` means no object
    record: Option<ObjectRecord>,
    state: State,
}

impl BlobStream {
    /// Create an unopened stream for `key` (normalised here)
    pub fn new<K: Into<BlobKey>>(store: Arc<dyn ObjectStore>, key: K) -> Self {
        Self::with_config(store, key, &StoreConfig::default())
    }

    pub fn with_config<K: Into<BlobKey>>(
        store: Arc<dyn ObjectStore>,
        key: K,
        config: &StoreConfig,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            skip_batch_bytes: config.skip_batch_bytes.max(1),
            offset: 0,
            record: None,
            state: State::Unopened,
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    pub fn phase(&self) -> StreamPhase {
        match self.state {
            State::Unopened => StreamPhase::Unopened,
            State::Open { .. } => StreamPhase::Open,
            State::Closed => StreamPhase::Closed,
        }
    }

    /// Mode of the current session, if open
    pub fn mode(&self) -> Option<StreamMode> {
        match &self.state {
            State::Open { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    pub fn has_read_channel(&self) -> bool {
        matches!(&self.state, State::Open { read: Some(_), .. })
    }

    pub fn has_write_channel(&self) -> bool {
        matches!(&self.state, State::Open { write: Some(_), .. })
    }

    /// Whether the object existed at the last snapshot
    pub fn exists(&self) -> bool {
        self.record.is_some()
    }

    /// The cached record snapshot
    pub fn record(&self) -> Option<&ObjectRecord> {
        self.record.as_ref()
    }

    fn cached_length(&self) -> u64 {
        self.record.as_ref().map_or(0, |record| record.length)
    }

    /// Move to `next`, returning the state left behind. The offset always
    /// restarts at zero on a phase change.
    fn enter(&mut self, next: State) -> State {
        self.offset = 0;
        std::mem::replace(&mut self.state, next)
    }

    /// Enter `next` and release any channels the old state held.
    ///
    /// Both channels are closed even if one fails; the first failure is
    /// returned.
    async fn shutdown(&mut self, next: State) -> BlobResult<()> {
        let State::Open { read, write, .. } = self.enter(next) else {
            return Ok(());
        };

        let mut first_error = None;

        if let Some(mut channel) = write {
            if let Err(err) = channel.close().await {
                warn!(key = %self.key, error = %err, "failed to commit upload channel");
                first_error.get_or_insert(err);
            } else {
                debug!(key = %self.key, id = %channel.id(), "upload committed");
            }
        }
        if let Some(mut cursor) = read {
            if let Err(err) = cursor.channel.close().await {
                warn!(key = %self.key, error = %err, "failed to close download channel");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Snapshot the object and start a session in `mode`.
    ///
    /// Refused with [`BlobError::NotPermitted`] when the mode requires a new
    /// object and one exists, or requires an existing object and none does;
    /// the stream is then left unopened at offset zero. A session already in
    /// progress is closed first; if that fails (an upload that could not be
    /// committed) the error is returned and the stream is left unopened.
    pub async fn open(&mut self, mode: StreamMode) -> BlobResult<()> {
        let previous = self.shutdown(State::Unopened).await;
        self.record = None;
        if let Err(err) = previous {
            warn!(key = %self.key, error = %err, "previous session did not close cleanly");
            return Err(err);
        }

        let record = self.store.find_one(self.key.as_str()).await?;
        let exists = record.is_some();

        let violation = if exists && !mode.allows_existing() {
            Some(ModeViolation::AlreadyExists)
        } else if !exists && !mode.allows_missing() {
            Some(ModeViolation::Missing)
        } else {
            None
        };

        if let Some(reason) = violation {
            debug!(key = %self.key, %reason, "open refused");
            return Err(BlobError::NotPermitted {
                key: self.key.to_string(),
                reason,
            });
        }

        debug!(key = %self.key, exists, ?mode, "stream opened");
        self.record = record;
        self.enter(State::Open {
            mode,
            read: None,
            write: None,
        });

        Ok(())
    }

    /// Read up to `count` bytes from the current offset.
    ///
    /// Never reads past the length cached at `open`, and holds at most one
    /// call's worth of bytes in memory.
    pub async fn read(&mut self, count: usize) -> IoOutcome<Bytes> {
        let Self {
            store,
            key,
            skip_batch_bytes,
            offset,
            record,
            state,
        } = self;

        let State::Open { mode, read, .. } = state else {
            return IoOutcome::NoOp(NoOp::NotOpened);
        };
        if !mode.allows_read {
            return IoOutcome::NoOp(NoOp::NotReadable);
        }
        if count == 0 {
            return IoOutcome::NoOp(NoOp::EmptyRequest);
        }
        let Some(record) = record.as_ref() else {
            return IoOutcome::NoOp(NoOp::Missing);
        };

        let wanted = record.length.saturating_sub(*offset).min(count as u64) as usize;
        if wanted == 0 {
            return IoOutcome::Done(Bytes::new());
        }

        let cursor = match position_cursor(&**store, key, read, *offset, *skip_batch_bytes).await {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!(key = %key, offset = *offset, error = %err, "download channel unavailable");
                return IoOutcome::Failed(err);
            }
        };

        let mut buf = BytesMut::with_capacity(wanted);
        while buf.len() < wanted {
            match cursor.channel.read(wanted - buf.len()).await {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => {
                    cursor.position += bytes.len() as u64;
                    buf.extend_from_slice(&bytes);
                }
                Err(err) => {
                    warn!(key = %key, offset = *offset, error = %err, "read failed");
                    return IoOutcome::Failed(err);
                }
            }
        }

        *offset = offset.saturating_add(buf.len() as u64).min(MAX_OFFSET);
        IoOutcome::Done(buf.freeze())
    }

    /// Append `data` to the object's replacement.
    ///
    /// The first write of a session deletes the stored object (if any) and
    /// opens an upload channel whose content type comes from the key's
    /// extension. A failed channel write leaves the offset untouched.
    pub async fn write(&mut self, data: &[u8]) -> IoOutcome<usize> {
        let Self {
            store,
            key,
            offset,
            record,
            state,
            ..
        } = self;

        let State::Open { mode, read, write } = state else {
            return IoOutcome::NoOp(NoOp::NotOpened);
        };
        if !mode.allows_write {
            return IoOutcome::NoOp(NoOp::NotWritable);
        }

        let channel = match ensure_write_channel(&**store, key, offset, record, read, write).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(key = %key, error = %err, "upload channel unavailable");
                return IoOutcome::Failed(err);
            }
        };

        match channel.write(data).await {
            Ok(written) => {
                *offset = offset.saturating_add(written as u64).min(MAX_OFFSET);
                IoOutcome::Done(written)
            }
            Err(err) => {
                warn!(key = %key, offset = *offset, error = %err, "write failed");
                IoOutcome::Failed(err)
            }
        }
    }

    /// Move the logical offset. Results clamp to `0..=i64::MAX`; positions past
    /// the end are allowed and read as empty. Channels are not touched.
    pub fn seek(&mut self, pos: SeekFrom) -> u64 {
        let candidate: i128 = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => self.cached_length() as i128 + delta as i128,
        };
        self.offset = candidate.clamp(0, MAX_OFFSET as i128) as u64;
        self.offset
    }

    /// Current logical offset
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Whether the offset is at or past the cached length
    pub fn eof(&self) -> bool {
        self.offset >= self.cached_length()
    }

    /// File status from the cached record, `None` if the object does not exist
    pub fn stat(&self) -> Option<BlobStat> {
        self.record.as_ref().map(BlobStat::from_record)
    }

    /// Lend out the raw channel for the session's capability, opening it first.
    ///
    /// Readable sessions get the download channel (`None` if there is no
    /// object), write-only sessions the upload channel. After a lent read
    /// channel the next `read` reopens rather than trust its position.
    pub async fn cast(&mut self) -> BlobResult<Option<ChannelHandle<'_>>> {
        let Self {
            store,
            key,
            offset,
            record,
            state,
            ..
        } = self;

        let State::Open { mode, read, write } = state else {
            return Ok(None);
        };

        if mode.allows_read {
            if record.is_none() {
                return Ok(None);
            }
            let cursor = match read.take() {
                Some(cursor) => read.insert(cursor),
                None => read.insert(ReadCursor::new(
                    store.open_download_channel(key.as_str()).await?,
                )),
            };
            cursor.trusted = false;
            return Ok(Some(ChannelHandle::Read(cursor.channel.as_mut())));
        }

        if mode.allows_write {
            let channel = ensure_write_channel(&**store, key, offset, record, read, write).await?;
            return Ok(Some(ChannelHandle::Write(channel.as_mut())));
        }

        Ok(None)
    }

    /// Delete the object by its cached id. `false` if there is none.
    pub async fn unlink(&mut self) -> BlobResult<bool> {
        let Some(record) = self.record.as_ref() else {
            return Ok(false);
        };

        self.store.delete(&record.id).await?;
        debug!(key = %self.key, id = %record.id, "object unlinked");
        self.record = None;

        Ok(true)
    }

    /// Release both channels, committing any upload, and reset the offset
    pub async fn close(&mut self) -> BlobResult<()> {
        self.shutdown(State::Closed).await
    }

    /// Same as [`close`](Self::close): writes are never buffered here
    pub async fn flush(&mut self) -> BlobResult<()> {
        self.close().await
    }
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream")
            .field("key", &self.key)
            .field("phase", &self.phase())
            .field("offset", &self.offset)
            .field("exists", &self.exists())
            .finish()
    }
}

/// Get a download channel whose real position equals `target`.
async fn position_cursor<'c>(
    store: &dyn ObjectStore,
    key: &BlobKey,
    slot: &'c mut Option<ReadCursor>,
    target: u64,
    skip_batch_bytes: usize,
) -> BlobResult<&'c mut ReadCursor> {
    let cursor = match slot.take() {
        Some(cursor) if cursor.usable_for(target) => slot.insert(cursor),
        stale => {
            if let Some(mut stale) = stale {
                debug!(key = %key, from = stale.position, to = target, "reopening download channel");
                if let Err(err) = stale.channel.close().await {
                    warn!(key = %key, error = %err, "failed to close stale download channel");
                }
            }
            slot.insert(ReadCursor::new(store.open_download_channel(key.as_str()).await?))
        }
    };

    while cursor.position < target {
        let gap = (target - cursor.position).min(skip_batch_bytes as u64) as usize;
        let skipped = cursor.channel.read(gap).await?;
        if skipped.is_empty() {
            break;
        }
        cursor.position += skipped.len() as u64;
    }

    Ok(cursor)
}

/// Get the session's upload channel, replacing the stored object on first use.
async fn ensure_write_channel<'w>(
    store: &dyn ObjectStore,
    key: &BlobKey,
    offset: &mut u64,
    record: &mut Option<ObjectRecord>,
    read: &mut Option<ReadCursor>,
    slot: &'w mut Option<Box<dyn WriteChannel>>,
) -> BlobResult<&'w mut Box<dyn WriteChannel>> {
    if let Some(channel) = slot.take() {
        return Ok(slot.insert(channel));
    }

    if record.is_some() {
        // Delete every record under the key, including stray duplicates
        while let Some(existing) = store.find_one(key.as_str()).await? {
            store.delete(&existing.id).await?;
            debug!(key = %key, id = %existing.id, "replaced existing object");
        }
        *record = None;
        *offset = 0;

        if let Some(mut cursor) = read.take() {
            if let Err(err) = cursor.channel.close().await {
                warn!(key = %key, error = %err, "failed to close download channel of replaced object");
            }
        }
    }

    let metadata = UploadMetadata::new(sniff_extension(key));
    let channel = store.open_upload_channel(key.as_str(), metadata).await?;
    debug!(key = %key, id = %channel.id(), "upload channel opened");

    Ok(slot.insert(channel))
}
