//! Rope of shared byte chunks.

use std::fmt;

use bytes::Bytes;
use smallvec::SmallVec;

/// A byte string stored as a sequence of reference-counted chunks.
///
/// Appending a [`Bytes`] shares it instead of copying, which is what lets
/// [`ChunkedInputStream`](crate::ChunkedInputStream) and
/// [`CordOutputStream`](crate::CordOutputStream) move large payloads
/// without touching their contents. Empty chunks are never stored.
#[derive(Clone, Default)]
pub struct Cord {
    chunks: SmallVec<[Bytes; 4]>,
    len: usize,
}

impl Cord {
    /// An empty cord.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the cord holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append `chunk` without copying it.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Append a copy of `data`.
    pub fn append_slice(&mut self, data: &[u8]) {
        self.append(Bytes::copy_from_slice(data));
    }

    /// Append every chunk of `other`, sharing them.
    pub fn append_cord(&mut self, other: &Cord) {
        for chunk in other.chunks() {
            self.append(chunk.clone());
        }
    }

    /// Remove all contents.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Contents as one contiguous buffer. Free for single-chunk cords.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            _ => Bytes::from(self.to_vec()),
        }
    }

    /// Contents copied into a `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter().copied())
    }
}

impl PartialEq for Cord {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bytes().eq(other.bytes())
    }
}

impl Eq for Cord {}

impl PartialEq<[u8]> for Cord {
    fn eq(&self, other: &[u8]) -> bool {
        self.len == other.len() && self.bytes().eq(other.iter().copied())
    }
}

impl From<Bytes> for Cord {
    fn from(chunk: Bytes) -> Self {
        let mut cord = Self::new();
        cord.append(chunk);
        cord
    }
}

impl From<Vec<u8>> for Cord {
    fn from(data: Vec<u8>) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<&[u8]> for Cord {
    fn from(data: &[u8]) -> Self {
        Self::from(Bytes::copy_from_slice(data))
    }
}

impl From<&str> for Cord {
    fn from(data: &str) -> Self {
        Self::from(data.as_bytes())
    }
}

impl fmt::Debug for Cord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cord")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
