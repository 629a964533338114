use std::fmt;

use im::Vector;

use super::Chunk;

/// FIFO of chunks with O(1) total size.
///
/// `take`/`drop` keep the existing chunk boundaries and only split the one
/// chunk that straddles the cut.
pub struct ChunkQueue<O> {
    chunks: Vector<Chunk<O>>,
    size: usize,
}

impl<O> Clone for ChunkQueue<O> {
    fn clone(&self) -> Self {
        ChunkQueue {
            chunks: self.chunks.clone(),
            size: self.size,
        }
    }
}

impl<O> ChunkQueue<O> {
    pub fn new() -> Self {
        ChunkQueue {
            chunks: Vector::new(),
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn chunks(&self) -> &Vector<Chunk<O>> {
        &self.chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &O> {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    pub fn enqueue(&mut self, chunk: Chunk<O>) {
        self.size += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn prepend(&mut self, chunk: Chunk<O>) {
        self.size += chunk.len();
        self.chunks.push_front(chunk);
    }

    pub fn take(&self, n: usize) -> ChunkQueue<O> {
        if n == 0 {
            return Self::new();
        }
        if n >= self.size {
            return self.clone();
        }
        let mut out = Self::new();
        let mut remaining = n;
        for chunk in self.chunks.iter() {
            if chunk.len() >= remaining {
                out.enqueue(chunk.take(remaining));
                break;
            }
            remaining -= chunk.len();
            out.enqueue(chunk.clone());
        }
        out
    }

    pub fn drop(&self, n: usize) -> ChunkQueue<O> {
        if n == 0 {
            return self.clone();
        }
        if n >= self.size {
            return Self::new();
        }
        let mut chunks = self.chunks.clone();
        let mut remaining = n;
        while let Some(front) = chunks.pop_front() {
            if front.len() > remaining {
                chunks.push_front(front.drop(remaining));
                break;
            }
            remaining -= front.len();
        }
        ChunkQueue {
            chunks,
            size: self.size - n,
        }
    }

    pub fn take_last(&self, n: usize) -> ChunkQueue<O> {
        self.drop(self.size.saturating_sub(n))
    }

    pub fn drop_last(&self, n: usize) -> ChunkQueue<O> {
        self.take(self.size.saturating_sub(n))
    }
}

impl<O: Clone> ChunkQueue<O> {
    pub fn to_chunk(&self) -> Chunk<O> {
        Chunk::concat(self.chunks.iter().cloned())
    }
}

impl<O> Default for ChunkQueue<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> FromIterator<Chunk<O>> for ChunkQueue<O> {
    fn from_iter<I: IntoIterator<Item = Chunk<O>>>(iter: I) -> Self {
        let mut queue = Self::new();
        for chunk in iter {
            queue.enqueue(chunk);
        }
        queue
    }
}

impl<O: fmt::Debug> fmt::Debug for ChunkQueue<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkQueue")
            .field("size", &self.size)
            .field("chunks", &self.chunks.iter().collect::<Vec<_>>())
            .finish()
    }
}
