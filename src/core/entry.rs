/// A resident cache entry.
///
/// Owns the payload while it sits in the cache. Handing an `Entry` back to a
/// caller through `get` or `delete` transfers that ownership, the cache keeps
/// no reference afterwards.
#[derive(Debug)]
pub struct Entry<V> {
    /// Content signature the entry is indexed by.
    signature: u64,
    /// The cached object.
    payload: V,
    /// Bytes charged against the budget.
    size: usize,
    /// Caller classification, never part of the key.
    tag: u32,
}

impl<V> Entry<V> {
    /// Creates a new cache entry.
    #[inline]
    pub fn new(signature: u64, payload: V, size: usize, tag: u32) -> Self {
        Self {
            signature,
            payload,
            size,
            tag,
        }
    }

    #[inline]
    pub fn signature(&self) -> u64 {
        self.signature
    }

    #[inline]
    pub fn payload(&self) -> &V {
        &self.payload
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Consumes the entry, keeping only the payload.
    #[inline]
    pub fn into_payload(self) -> V {
        self.payload
    }

    /// Consumes the entry into `(payload, size, tag)`.
    #[inline]
    pub fn into_parts(self) -> (V, usize, u32) {
        (self.payload, self.size, self.tag)
    }
}
