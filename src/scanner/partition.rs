use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::ScanError;

/// One past the highest TCP port.
const TCP_PORT_END: u32 = u16::MAX as u32 + 1;

/// Half-open port interval `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub low: u32,
    pub high: u32,
}

impl ScanRange {
    /// Bounds come straight from config, so they are validated here.
    /// Ports above 65535 are accepted and later fail to probe.
    pub fn new(low: i64, high: i64) -> Result<Self, ScanError> {
        let invalid = ScanError::InvalidRange { low, high };
        if low < 0 || high < 0 || low > high {
            return Err(invalid);
        }

        match (u32::try_from(low), u32::try_from(high)) {
            (Ok(low), Ok(high)) => Ok(Self { low, high }),
            _ => Err(invalid),
        }
    }

    pub fn len(&self) -> usize {
        (self.high - self.low) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }

    /// Number of ports that lie inside the TCP port space.
    pub fn probe_len(&self) -> usize {
        (self.low.min(TCP_PORT_END)..self.high.min(TCP_PORT_END)).len()
    }
}

/// Contiguous slice of the scan range owned by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChunk {
    pub index: usize,
    pub ports: Range<u32>,
}

impl PortChunk {
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// The part of this chunk that lies inside the TCP port space.
    pub fn tcp_ports(&self) -> Range<u32> {
        self.ports.start.min(TCP_PORT_END)..self.ports.end.min(TCP_PORT_END)
    }

    /// Ports above 65535, which are counted but never probed.
    pub fn beyond_tcp_space(&self) -> usize {
        self.len() - self.tcp_ports().len()
    }
}

/// Split `range` into exactly `thread_count` ascending chunks whose sizes
/// differ by at most one. The leading chunks absorb the remainder, and
/// trailing chunks are empty when there are more workers than ports.
///
/// Chunks are produced lazily, so a thread count far larger than the range
/// costs nothing until the empty tail is actually walked.
pub fn partition(range: ScanRange, thread_count: usize) -> Result<Partition, ScanError> {
    if thread_count == 0 {
        return Err(ScanError::InvalidThreadCount);
    }

    let total = range.len();
    Ok(Partition {
        base: total / thread_count,
        remainder: total % thread_count,
        count: thread_count,
        index: 0,
        start: range.low,
    })
}

/// Iterator over the chunks of a partitioned range.
#[derive(Debug, Clone)]
pub struct Partition {
    base: usize,
    remainder: usize,
    count: usize,
    index: usize,
    start: u32,
}

impl Iterator for Partition {
    type Item = PortChunk;

    fn next(&mut self) -> Option<PortChunk> {
        if self.index == self.count {
            return None;
        }

        let size = self.base + usize::from(self.index < self.remainder);
        // size <= range length, which fits in u32
        let end = self.start + size as u32;
        let chunk = PortChunk { index: self.index, ports: self.start..end };
        self.start = end;
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Partition {}
