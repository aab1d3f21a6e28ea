//! Test utilities and mock types for pbcore development.
//!
//! Provides mock byte sources and sinks ([`MockSource`], [`MockSink`]) that
//! record how the coded streams drive them, arena fixtures in [`fixtures`],
//! and [`init_tracing`] for readable log output under `cargo test`.

#![deny(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{CountingBlockAllocator, DropLog, DropProbe};

use pbcore_io::{ZeroCopyInputStream, ZeroCopyOutputStream};
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Filtered by `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Byte source that hands out fixed-size chunks and records every call.
#[derive(Debug)]
pub struct MockSource {
    data: Vec<u8>,
    chunk_size: usize,
    position: usize,
    last_returned: usize,
    next_calls: usize,
    backed_up: Vec<usize>,
}

impl MockSource {
    pub fn new(data: impl Into<Vec<u8>>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size: chunk_size.max(1),
            position: 0,
            last_returned: 0,
            next_calls: 0,
            backed_up: Vec::new(),
        }
    }

    /// Number of `next` calls so far, including failed ones.
    pub fn next_calls(&self) -> usize {
        self.next_calls
    }

    /// Every `back_up` count, in call order.
    pub fn backed_up(&self) -> &[usize] {
        &self.backed_up
    }

    /// Offset of the first byte not yet handed out.
    pub fn position(&self) -> usize {
        self.position
    }
}

// SAFETY: chunks borrow `data`, which is never modified after construction.
#[allow(unsafe_code)]
unsafe impl ZeroCopyInputStream for MockSource {
    fn next(&mut self) -> Option<&[u8]> {
        self.next_calls += 1;
        if self.position == self.data.len() {
            self.last_returned = 0;
            return None;
        }
        let n = self.chunk_size.min(self.data.len() - self.position);
        let start = self.position;
        self.position += n;
        self.last_returned = n;
        Some(&self.data[start..self.position])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            count <= self.last_returned,
            "backed up {count} bytes of a {} byte chunk",
            self.last_returned
        );
        self.position -= count;
        self.last_returned = 0;
        self.backed_up.push(count);
    }

    fn skip(&mut self, count: usize) -> bool {
        self.last_returned = 0;
        let n = count.min(self.data.len() - self.position);
        self.position += n;
        n == count
    }

    fn byte_count(&self) -> i64 {
        self.position as i64
    }
}

/// Byte sink that hands out fixed-size chunks and records every call.
///
/// With a capacity it fails once that many bytes have been handed out.
#[derive(Debug)]
pub struct MockSink {
    data: Vec<u8>,
    chunk_size: usize,
    capacity: Option<usize>,
    aliasing: bool,
    next_calls: usize,
    aliased_writes: usize,
    backed_up: Vec<usize>,
}

impl MockSink {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            data: Vec::new(),
            chunk_size: chunk_size.max(1),
            capacity: None,
            aliasing: false,
            next_calls: 0,
            aliased_writes: 0,
            backed_up: Vec::new(),
        }
    }

    /// Fail `next` once `capacity` bytes have been handed out.
    pub fn with_capacity(chunk_size: usize, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(chunk_size)
        }
    }

    /// Accept aliased writes.
    pub fn with_aliasing(mut self) -> Self {
        self.aliasing = true;
        self
    }

    /// Bytes written so far, net of back-ups.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of `next` calls so far, including failed ones.
    pub fn next_calls(&self) -> usize {
        self.next_calls
    }

    /// Number of writes that arrived through `write_aliased_raw`.
    pub fn aliased_writes(&self) -> usize {
        self.aliased_writes
    }

    /// Every `back_up` count, in call order.
    pub fn backed_up(&self) -> &[usize] {
        &self.backed_up
    }
}

// SAFETY: the vector only grows inside `next` and shrinks inside `back_up`,
// and is read only through `&self` accessors after the coded stream is gone.
#[allow(unsafe_code)]
unsafe impl ZeroCopyOutputStream for MockSink {
    fn next(&mut self) -> Option<&mut [u8]> {
        self.next_calls += 1;
        let start = self.data.len();
        let room = self
            .capacity
            .map_or(self.chunk_size, |cap| cap.saturating_sub(start));
        let n = self.chunk_size.min(room);
        if n == 0 {
            return None;
        }
        self.data.resize(start + n, 0);
        Some(&mut self.data[start..])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            count <= self.data.len(),
            "backed up {count} bytes of {} written",
            self.data.len()
        );
        let len = self.data.len() - count;
        self.data.truncate(len);
        self.backed_up.push(count);
    }

    fn byte_count(&self) -> i64 {
        self.data.len() as i64
    }

    fn allows_aliasing(&self) -> bool {
        self.aliasing
    }

    fn write_aliased_raw(&mut self, data: &[u8]) -> bool {
        if !self.aliasing {
            return false;
        }
        self.aliased_writes += 1;
        self.data.extend_from_slice(data);
        true
    }
}
