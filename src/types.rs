//! # Domain Types for BrookDB
//!
//! This module defines the core types used throughout BrookDB: stream keys,
//! positions, range keys, and events.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the newtype pattern for addressing primitives. A [`Position`] is not
//! a bare `i64` and a [`StreamKey`] is not a bare string; function signatures
//! say what they expect and the compiler rejects mix-ups.
//!
//! ## Invariants
//!
//! - [`Position`]: signed, `>= -1`; `-1` means "unset / empty stream";
//!   0-based and monotonically increasing per stream
//! - [`StreamKey`]: two non-empty components, neither containing `|`,
//!   combined textual form at most 1024 characters
//! - [`RangeKey`]: a `StreamKey` plus a contiguous window
//!   `[start, start + count)` with `start >= 0` and `count >= 0`

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Separator used by the textual key forms (`"type|id"`, `"type|id|start|count"`).
pub const KEY_SEPARATOR: char = '|';

/// Maximum length of a key's combined textual form.
pub const MAX_KEY_LENGTH: usize = 1024;

// =============================================================================
// Position
// =============================================================================

/// A position within a single stream.
///
/// Positions are 0-based and contiguous: the first event of a stream sits at
/// position 0, the Nth at N−1. The special value [`Position::NONE`] (−1)
/// means "unset / empty stream" and is what an empty stream reports as its
/// head. Ordering (`<`, `>`) defines "newer than".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(i64);

impl Position {
    /// The "unset / empty stream" sentinel (−1).
    pub const NONE: Position = Position(-1);

    /// The first valid event position (0).
    pub const FIRST: Position = Position(0);

    /// Creates a `Position` from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value < -1`; such a value can never address an event.
    pub fn from_raw(value: i64) -> Self {
        assert!(value >= -1, "Position cannot be below -1");
        Self(value)
    }

    /// Returns the raw `i64` value for storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns the position immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this position advanced by `count`.
    ///
    /// The final head after appending `count` events at head `h` is
    /// `h.add(count)`.
    pub fn add(&self, count: i64) -> Self {
        Self(self.0 + count)
    }

    /// Returns true if this is the "unset / empty stream" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == -1
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Stream Key
// =============================================================================

/// Addresses one brook: an append-only event log for a single entity.
///
/// A key is a (`type`, `id`) pair, e.g. `("order", "o-1234")`, with the
/// textual round-trip form `"order|o-1234"`. Components must be non-empty,
/// must not contain the separator, and the combined form is bounded to 1024
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    type_name: String,
    id: String,
}

impl StreamKey {
    /// Creates a stream key, validating both components.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for empty components,
    /// [`Error::MalformedKey`] for separator characters or an oversized
    /// combined form.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let type_name = type_name.into();
        let id = id.into();

        if type_name.is_empty() {
            return Err(Error::InvalidArgument("stream key type must not be empty".into()));
        }
        if id.is_empty() {
            return Err(Error::InvalidArgument("stream key id must not be empty".into()));
        }
        validate_component("type", &type_name)?;
        validate_component("id", &id)?;

        let combined_len = type_name.len() + 1 + id.len();
        if combined_len > MAX_KEY_LENGTH {
            return Err(Error::MalformedKey(format!(
                "combined key length {} exceeds {}",
                combined_len, MAX_KEY_LENGTH
            )));
        }

        Ok(Self { type_name, id })
    }

    /// The entity type component.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The entity id component.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.type_name, KEY_SEPARATOR, self.id)
    }
}

impl FromStr for StreamKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(type_name), Some(id), None) => StreamKey::new(type_name, id),
            _ => Err(Error::MalformedKey(format!(
                "expected 'type{}id', got '{}'",
                KEY_SEPARATOR, s
            ))),
        }
    }
}

fn validate_component(name: &str, value: &str) -> Result<()> {
    if value.contains(KEY_SEPARATOR) {
        return Err(Error::MalformedKey(format!(
            "key {} '{}' must not contain '{}'",
            name, value, KEY_SEPARATOR
        )));
    }
    Ok(())
}

// =============================================================================
// Range Key
// =============================================================================

/// Addresses a contiguous window `[start, start + count)` of a stream.
///
/// Textual form `"type|id|start|count"` under the same length and character
/// constraints as [`StreamKey`]. Converts to and from a plain stream key
/// (dropping the window).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeKey {
    key: StreamKey,
    start: Position,
    count: i64,
}

impl RangeKey {
    /// Creates a range key over `[start, start + count)`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `start < 0` or `count < 0`,
    /// [`Error::MalformedKey`] if the combined textual form exceeds the
    /// length bound.
    pub fn new(key: StreamKey, start: Position, count: i64) -> Result<Self> {
        if start < Position::FIRST {
            return Err(Error::InvalidArgument(format!(
                "range start must be >= 0, got {}",
                start
            )));
        }
        if count < 0 {
            return Err(Error::InvalidArgument(format!(
                "range count must be >= 0, got {}",
                count
            )));
        }

        let range = Self { key, start, count };
        if range.to_string().len() > MAX_KEY_LENGTH {
            return Err(Error::MalformedKey(format!(
                "combined range key length exceeds {}",
                MAX_KEY_LENGTH
            )));
        }
        Ok(range)
    }

    /// The underlying stream key.
    pub fn stream_key(&self) -> &StreamKey {
        &self.key
    }

    /// First position of the window (inclusive).
    pub fn start(&self) -> Position {
        self.start
    }

    /// Number of positions in the window.
    pub fn count(&self) -> i64 {
        self.count
    }

    /// One past the last position of the window: `start + count`.
    pub fn end(&self) -> Position {
        self.start.add(self.count)
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.key,
            KEY_SEPARATOR,
            self.start.as_raw(),
            KEY_SEPARATOR,
            self.count
        )
    }
}

impl FromStr for RangeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(KEY_SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(Error::MalformedKey(format!(
                "expected 'type{sep}id{sep}start{sep}count', got '{}'",
                s,
                sep = KEY_SEPARATOR
            )));
        }

        let start: i64 = parts[2]
            .parse()
            .map_err(|_| Error::MalformedKey(format!("range start '{}' is not a number", parts[2])))?;
        let count: i64 = parts[3]
            .parse()
            .map_err(|_| Error::MalformedKey(format!("range count '{}' is not a number", parts[3])))?;
        if start < 0 {
            return Err(Error::MalformedKey(format!("range start {} must be >= 0", start)));
        }

        RangeKey::new(StreamKey::new(parts[0], parts[1])?, Position::from_raw(start), count)
    }
}

impl From<RangeKey> for StreamKey {
    fn from(range: RangeKey) -> Self {
        range.key
    }
}

// =============================================================================
// Events
// =============================================================================

/// An event payload with its envelope fields.
///
/// This is the "input" form - what the client provides when appending. The
/// engine never interprets `data`; it is an opaque byte buffer tagged with a
/// content type, content-addressed by the caller-assigned `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Caller-assigned unique identifier.
    pub id: String,

    /// Origin of the event (service, aggregate, URI - the engine doesn't care).
    pub source: String,

    /// Classification, e.g. `"OrderPlaced"`.
    pub event_type: String,

    /// Content type tag for `data`, e.g. `"application/json"`.
    pub data_content_type: String,

    /// The payload. Opaque to the engine.
    pub data: Vec<u8>,

    /// Optional event timestamp (Unix milliseconds).
    pub time_ms: Option<u64>,
}

impl Event {
    /// Creates an event with the given envelope and payload.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        data_content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            data_content_type: data_content_type.into(),
            data: data.into(),
            time_ms: None,
        }
    }

    /// Sets the event timestamp (builder pattern).
    pub fn with_time_ms(mut self, time_ms: u64) -> Self {
        self.time_ms = Some(time_ms);
        self
    }
}

/// A stored event with its assigned stream position.
///
/// This is the "output" form - what the read path returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// The position the event occupies in its stream.
    pub position: Position,

    /// The event as appended.
    pub event: Event,
}

// =============================================================================
// Head Metadata
// =============================================================================

/// The write-ahead intent marker for an in-progress multi-batch append.
///
/// Created before the first batch of a large append is written and removed on
/// commit or rollback. Its existence signals an interrupted operation: events
/// in `(original, target]` may or may not all exist, and the recovery service
/// resolves which on the next access to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingHead {
    /// The committed head before the append started.
    pub original: Position,

    /// The head the append will commit if it completes: `original + count`.
    pub target: Position,
}

// =============================================================================
// Tests
// =============================================================================
