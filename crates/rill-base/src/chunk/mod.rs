use std::fmt;
use std::ops::Index;
use std::sync::Arc;

mod queue;

pub use queue::ChunkQueue;

/// Immutable, finite, randomly indexable batch of stream elements.
///
/// Cloning is cheap for every representation: slices share the backing
/// array and singletons share their element.
pub struct Chunk<O> {
    repr: Repr<O>,
}

enum Repr<O> {
    Empty,
    Singleton(Arc<O>),
    Boxed {
        values: Arc<[O]>,
        offset: usize,
        len: usize,
    },
}

impl<O> Clone for Repr<O> {
    fn clone(&self) -> Self {
        match self {
            Repr::Empty => Repr::Empty,
            Repr::Singleton(value) => Repr::Singleton(Arc::clone(value)),
            Repr::Boxed {
                values,
                offset,
                len,
            } => Repr::Boxed {
                values: Arc::clone(values),
                offset: *offset,
                len: *len,
            },
        }
    }
}

impl<O> Clone for Chunk<O> {
    fn clone(&self) -> Self {
        Chunk {
            repr: self.repr.clone(),
        }
    }
}

impl<O> Chunk<O> {
    pub fn empty() -> Self {
        Chunk { repr: Repr::Empty }
    }

    pub fn singleton(value: O) -> Self {
        Chunk {
            repr: Repr::Singleton(Arc::new(value)),
        }
    }

    pub fn from_vec(mut values: Vec<O>) -> Self {
        match values.len() {
            0 => Self::empty(),
            1 => match values.pop() {
                Some(value) => Self::singleton(value),
                None => Self::empty(),
            },
            _ => Self::boxed(values.into()),
        }
    }

    /// Views the whole of `values` without copying.
    pub fn boxed(values: Arc<[O]>) -> Self {
        let len = values.len();
        Self::boxed_slice(values, 0, len)
    }

    fn boxed_slice(values: Arc<[O]>, offset: usize, len: usize) -> Self {
        if len == 0 {
            return Self::empty();
        }
        Chunk {
            repr: Repr::Boxed {
                values,
                offset,
                len,
            },
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Empty => 0,
            Repr::Singleton(_) => 1,
            Repr::Boxed { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[O] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Singleton(value) => std::slice::from_ref(&**value),
            Repr::Boxed {
                values,
                offset,
                len,
            } => &values[*offset..*offset + *len],
        }
    }

    pub fn get(&self, index: usize) -> Option<&O> {
        self.as_slice().get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, O> {
        self.as_slice().iter()
    }

    pub fn first(&self) -> Option<&O> {
        self.as_slice().first()
    }

    pub fn last(&self) -> Option<&O> {
        self.as_slice().last()
    }

    /// Splits into `(first n, rest)`; `n == 0` yields `(empty, self)` and
    /// `n >= len` yields `(self, empty)`.
    pub fn split_at(&self, n: usize) -> (Chunk<O>, Chunk<O>) {
        if n == 0 {
            return (Self::empty(), self.clone());
        }
        if n >= self.len() {
            return (self.clone(), Self::empty());
        }
        match &self.repr {
            Repr::Boxed {
                values,
                offset,
                len,
            } => (
                Self::boxed_slice(Arc::clone(values), *offset, n),
                Self::boxed_slice(Arc::clone(values), offset + n, len - n),
            ),
            // 0 < n < len is impossible for sizes 0 and 1.
            _ => (self.clone(), Self::empty()),
        }
    }

    pub fn take(&self, n: usize) -> Chunk<O> {
        self.split_at(n).0
    }

    pub fn drop(&self, n: usize) -> Chunk<O> {
        self.split_at(n).1
    }

    pub fn take_last(&self, n: usize) -> Chunk<O> {
        self.drop(self.len().saturating_sub(n))
    }

    pub fn drop_last(&self, n: usize) -> Chunk<O> {
        self.take(self.len().saturating_sub(n))
    }

    pub fn map<P>(&self, f: impl FnMut(&O) -> P) -> Chunk<P> {
        self.iter().map(f).collect()
    }

    pub fn zip_with<P, Q>(&self, other: &Chunk<P>, mut f: impl FnMut(&O, &P) -> Q) -> Chunk<Q> {
        self.iter()
            .zip(other.iter())
            .map(|(left, right)| f(left, right))
            .collect()
    }

    pub fn index_where(&self, pred: impl FnMut(&O) -> bool) -> Option<usize> {
        self.iter().position(pred)
    }

    pub fn fold<B>(&self, init: B, f: impl FnMut(B, &O) -> B) -> B {
        self.iter().fold(init, f)
    }

    /// Running fold; returns every intermediate state after `init` and the final state.
    pub fn scan_left<B: Clone>(&self, init: B, mut f: impl FnMut(&B, &O) -> B) -> (Chunk<B>, B) {
        let mut acc = init;
        let mut out = Vec::with_capacity(self.len());
        for value in self.iter() {
            acc = f(&acc, value);
            out.push(acc.clone());
        }
        (Chunk::from_vec(out), acc)
    }
}

impl<O: Clone> Chunk<O> {
    pub fn to_vec(&self) -> Vec<O> {
        self.as_slice().to_vec()
    }

    pub fn filter(&self, mut pred: impl FnMut(&O) -> bool) -> Chunk<O> {
        if self.iter().all(&mut pred) {
            return self.clone();
        }
        self.iter().filter(|value| pred(*value)).cloned().collect()
    }

    pub fn intersperse(&self, separator: O) -> Chunk<O> {
        let mut out = Vec::with_capacity(self.len() * 2);
        for (idx, value) in self.iter().enumerate() {
            if idx > 0 {
                out.push(separator.clone());
            }
            out.push(value.clone());
        }
        Chunk::from_vec(out)
    }

    /// Concatenates in order. A single non-empty input is returned as is;
    /// otherwise the elements are copied into one contiguous array.
    pub fn concat(chunks: impl IntoIterator<Item = Chunk<O>>) -> Chunk<O> {
        let mut non_empty: Vec<Chunk<O>> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        match non_empty.len() {
            0 => Chunk::empty(),
            1 => non_empty.pop().unwrap_or_default(),
            _ => {
                let total = non_empty.iter().map(Chunk::len).sum();
                let mut out = Vec::with_capacity(total);
                for chunk in &non_empty {
                    out.extend_from_slice(chunk.as_slice());
                }
                Chunk::boxed(out.into())
            }
        }
    }
}

impl<O> Default for Chunk<O> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<O> From<Vec<O>> for Chunk<O> {
    fn from(values: Vec<O>) -> Self {
        Self::from_vec(values)
    }
}

impl<O> FromIterator<O> for Chunk<O> {
    fn from_iter<I: IntoIterator<Item = O>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<'a, O> IntoIterator for &'a Chunk<O> {
    type Item = &'a O;
    type IntoIter = std::slice::Iter<'a, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<O> Index<usize> for Chunk<O> {
    type Output = O;

    fn index(&self, index: usize) -> &O {
        match self.get(index) {
            Some(value) => value,
            None => panic!(
                "index {index} out of bounds for chunk of size {}",
                self.len()
            ),
        }
    }
}

impl<O: PartialEq> PartialEq for Chunk<O> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<O: Eq> Eq for Chunk<O> {}

impl<O: fmt::Debug> fmt::Debug for Chunk<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Chunk")?;
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Builds a chunk from a list of expressions, `chunk![1, 2, 3]`.
#[macro_export]
macro_rules! chunk {
    () => {
        $crate::Chunk::empty()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Chunk::from_vec(vec![$($value),+])
    };
}
