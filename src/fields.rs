//! Immutable key/value field chains with structural sharing.
//!
//! Storage for context data is a singly-linked association list. "Adding" a
//! field never mutates an existing chain: it allocates a new head node that
//! references the old chain, so every derived chain shares its tail with its
//! ancestors and can be handed out freely without locking. Lookup walks from
//! the head toward the empty sentinel and returns the most recently appended
//! match, which is what makes re-appending a key shadow the older entry.
//!
//! Keys and values are type-erased so a single chain can hold heterogeneous
//! data; values are recovered at lookup call sites via
//! [`FieldValue::downcast_ref`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A context key, erased for heterogeneous storage.
///
/// Blanket-implemented for every `PartialEq + Send + Sync + 'static` type.
/// Two keys are equal when they have the same concrete type and compare
/// equal as values, so keys of distinct types never collide even when their
/// payloads look alike.
pub trait Key: Send + Sync + 'static {
    /// Compares this key against another, possibly differently typed key.
    fn key_eq(&self, other: &dyn Key) -> bool;

    /// Upcast used for downcast-based comparison.
    fn as_any(&self) -> &dyn Any;
}

impl<K> Key for K
where
    K: PartialEq + Send + Sync + 'static,
{
    fn key_eq(&self, other: &dyn Key) -> bool {
        other
            .as_any()
            .downcast_ref::<K>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased field value.
///
/// Cloning is cheap: the underlying value is shared. The concrete type is
/// recovered at the call site with [`FieldValue::downcast_ref`] or checked
/// with [`FieldValue::is`].
#[derive(Clone)]
pub struct FieldValue {
    value: Arc<dyn Any + Send + Sync>,
}

impl FieldValue {
    /// Erases `value` for storage in a chain.
    #[must_use]
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Returns a reference to the value if it is a `V`.
    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.value.downcast_ref()
    }

    /// Returns true if the stored value is a `V`.
    #[must_use]
    pub fn is<V: Any>(&self) -> bool {
        self.value.is::<V>()
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldValue(<erased>)")
    }
}

/// An ordered batch of key/value pairs for
/// [`Context::with_fields`](crate::Context::with_fields).
///
/// Pairs are applied in insertion order, so a later pair shadows an earlier
/// one with the same key within the same batch.
#[derive(Default)]
pub struct Fields {
    entries: Vec<(Arc<dyn Key>, FieldValue)>,
}

impl Fields {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair, builder style.
    #[must_use]
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Key,
        V: Any + Send + Sync,
    {
        self.insert(key, value);
        self
    }

    /// Adds a pair.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Key,
        V: Any + Send + Sync,
    {
        self.entries.push((Arc::new(key), FieldValue::new(value)));
    }

    /// Number of pairs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the batch holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(Arc<dyn Key>, FieldValue)> {
        self.entries
    }
}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fields")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// An immutable association list mapping erased keys to erased values.
///
/// Append is O(1) and produces a new head; the old chain is never touched.
/// Lookup is O(n) in chain length, acceptable because chains track context
/// derivation depth and are expected to stay short.
#[derive(Clone, Default)]
pub struct FieldChain {
    head: Option<Arc<ChainNode>>,
}

struct ChainNode {
    prev: Option<Arc<ChainNode>>,
    key: Arc<dyn Key>,
    value: FieldValue,
}

impl Drop for ChainNode {
    fn drop(&mut self) {
        // Keeps teardown of a uniquely owned tail iterative.
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

impl FieldChain {
    /// Creates an empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Returns a new chain whose head holds `key`/`value`.
    ///
    /// `self` is never mutated and keeps resolving exactly what it resolved
    /// before the call.
    #[must_use]
    pub fn append<K, V>(&self, key: K, value: V) -> Self
    where
        K: Key,
        V: Any + Send + Sync,
    {
        self.append_pair(Arc::new(key), FieldValue::new(value))
    }

    pub(crate) fn append_pair(&self, key: Arc<dyn Key>, value: FieldValue) -> Self {
        Self {
            head: Some(Arc::new(ChainNode {
                prev: self.head.clone(),
                key,
                value,
            })),
        }
    }

    /// Looks up the most recently appended value for `key`.
    ///
    /// Returns `None` for an empty chain or when the walk exhausts without a
    /// match.
    #[must_use]
    pub fn lookup(&self, key: &dyn Key) -> Option<FieldValue> {
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            if current.key.key_eq(key) {
                return Some(current.value.clone());
            }
            node = current.prev.as_deref();
        }
        None
    }

    /// Number of entries in the chain, shadowed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            len += 1;
            node = current.prev.as_deref();
        }
        len
    }

    /// Returns true if the chain holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl fmt::Debug for FieldChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldChain")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<V: Any + Clone>(chain: &FieldChain, key: &dyn Key) -> Option<V> {
        chain.lookup(key).and_then(|v| v.downcast_ref::<V>().cloned())
    }

    #[test]
    fn empty_chain_resolves_nothing() {
        let chain = FieldChain::new();
        assert!(chain.is_empty());
        assert!(chain.lookup(&"missing").is_none());
    }

    #[test]
    fn append_then_lookup() {
        let chain = FieldChain::new().append("user", "alice");
        assert_eq!(get::<&str>(&chain, &"user"), Some("alice"));
        assert!(chain.lookup(&"other").is_none());
    }

    #[test]
    fn latest_append_shadows_older_entry() {
        let chain = FieldChain::new().append("k", 1u32).append("k", 2u32);
        assert_eq!(get::<u32>(&chain, &"k"), Some(2));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn append_never_mutates_the_source_chain() {
        let base = FieldChain::new().append("k", 1u32);
        let derived = base.append("k", 2u32).append("extra", 3u32);

        assert_eq!(get::<u32>(&base, &"k"), Some(1));
        assert!(base.lookup(&"extra").is_none());
        assert_eq!(get::<u32>(&derived, &"k"), Some(2));
    }

    #[test]
    fn keys_of_distinct_types_never_collide() {
        #[derive(PartialEq)]
        struct Marker;

        let chain = FieldChain::new().append(1u32, "narrow").append(1u64, "wide");
        assert_eq!(get::<&str>(&chain, &1u32), Some("narrow"));
        assert_eq!(get::<&str>(&chain, &1u64), Some("wide"));
        assert!(chain.lookup(&Marker).is_none());
    }

    #[test]
    fn values_recover_their_concrete_type() {
        let value = FieldValue::new(String::from("payload"));
        assert!(value.is::<String>());
        assert!(!value.is::<u32>());
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("payload"));
        assert_eq!(value.downcast_ref::<u32>(), None);
    }

    #[test]
    fn fields_batch_preserves_insertion_order() {
        let fields = Fields::new().with("a", 1u32).with("b", 2u32);
        assert_eq!(fields.len(), 2);
        assert!(!fields.is_empty());

        let keys: Vec<bool> = fields
            .into_entries()
            .iter()
            .map(|(key, _)| key.key_eq(&"a"))
            .collect();
        assert_eq!(keys, vec![true, false]);
    }

    #[test]
    fn long_chain_drops_without_overflow() {
        let mut chain = FieldChain::new();
        for i in 0..100_000u32 {
            chain = chain.append(i, i);
        }
        drop(chain);
    }
}
