//! File names for uploaded routing tables.
//!
//! `<inverted millis>__<codec marker>`: the inverted timestamp makes the newest
//! file sort first in a plain lexicographic listing, and the codec marker is
//! always the last token so readers can find it without parsing the rest.

use crate::core::Result;
use crate::storage::{BlobPath, BlobStore, PATH_DELIMITER};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

pub const DELIMITER: &str = "__";
pub const CODEC_MARKER: &str = "CODEC1";

/// Maps an increasing value to a decreasing, fixed-width decimal string.
pub fn invert_long(value: i64) -> String {
    format!("{:019}", i64::MAX - value.max(0))
}

/// Inverse of [`invert_long`].
pub fn revert_long(inverted: &str) -> Option<i64> {
    inverted.parse::<i64>().ok().map(|v| i64::MAX - v)
}

/// Trailing codec token of a file name or full key.
pub fn codec_marker_of(key: &str) -> Option<&str> {
    let file_name = key.rsplit(PATH_DELIMITER).next()?;
    let (_, marker) = file_name.rsplit_once(DELIMITER)?;
    (!marker.is_empty()).then_some(marker)
}

/// Upload time encoded in a routing file name, in epoch millis.
pub fn timestamp_of(key: &str) -> Option<i64> {
    let file_name = key.rsplit(PATH_DELIMITER).next()?;
    let (inverted, _) = file_name.split_once(DELIMITER)?;
    revert_long(inverted)
}

/// Issues routing file names.
///
/// The issued millisecond never repeats within one generator: a call landing in
/// the same (or an earlier) millisecond as the previous one is bumped forward.
#[derive(Debug, Default)]
pub struct FileNameGenerator {
    last_millis: AtomicI64,
}

impl FileNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_file_name(&self) -> String {
        self.next_file_name_at(Utc::now().timestamp_millis())
    }

    /// Same as [`Self::next_file_name`] with an explicit wall clock reading.
    pub fn next_file_name_at(&self, now_millis: i64) -> String {
        let issued = self.issue(now_millis);
        format!("{}{}{}", invert_long(issued), DELIMITER, CODEC_MARKER)
    }

    fn issue(&self, now_millis: i64) -> i64 {
        let mut last = self.last_millis.load(Ordering::Acquire);
        loop {
            let next = now_millis.max(last.saturating_add(1));
            match self.last_millis.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Newest routing file under `partition_path`, judged by name order alone.
pub fn latest_routing_file(
    store: &dyn BlobStore,
    partition_path: &BlobPath,
) -> Result<Option<String>> {
    Ok(store
        .list_blobs(partition_path)?
        .into_iter()
        .find(|key| codec_marker_of(key).is_some()))
}
