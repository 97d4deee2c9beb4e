use std::{
    collections::HashSet,
    error::Error,
    fmt::{Debug, Display},
    hash::Hash,
};

use num_traits::{Bounded, One, PrimInt, Unsigned, WrappingAdd, Zero};

/// A typed handle to an entity owned by one of the editor's stores.
pub trait Key: Copy + Eq + Hash + Debug {
    type Id: PrimInt + Unsigned + WrappingAdd + Hash + Debug;
    fn new(id: Self::Id) -> Self;
    fn id(&self) -> Self::Id;
}

/// Declares a newtype key over an unsigned integer id.
macro_rules! key_type {
    ($v:vis struct $name:ident($id:ty)) => {
        #[derive(
            serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug,
        )]
        $v struct $name($id);
        impl $crate::editor::utils::key_generator::Key for $name {
            type Id = $id;
            fn new(id: Self::Id) -> Self {
                Self(id)
            }
            fn id(&self) -> Self::Id {
                self.0
            }
        }
    };
}
pub(crate) use key_type;

/// Hands out unique keys from an incrementing counter and remembers which ones
/// are still alive, so restored state can re-reserve its old keys.
#[derive(Debug)]
pub struct KeyGenerator<K>
where
    K: Key,
{
    last_id: K::Id,
    live: HashSet<K::Id>,
}
impl<K> KeyGenerator<K>
where
    K: Key,

    // Should be implied by `Key`, but rustc wants it spelled out
    K::Id: Bounded + Zero + One + Ord,
{
    pub fn new() -> Self {
        KeyGenerator {
            last_id: K::Id::max_value(),
            live: HashSet::new(),
        }
    }

    /// Create a generator with every key in the iterator already reserved.
    ///
    /// # Panics
    /// If the iterator contains duplicate keys.
    pub fn from_keys(keys: impl IntoIterator<Item = K>) -> Self {
        let mut generator = Self::new();
        let mut max = K::Id::zero();
        for key in keys {
            generator.reserve(key).expect("Duplicate key in iterator");
            max = max.max(key.id());
        }
        generator.last_id = max;
        generator
    }

    pub fn remaining(&self) -> K::Id {
        // `live` can never hold more ids than the id type has values
        K::Id::max_value() - num_traits::cast(self.live.len()).unwrap()
    }

    /// Return a fresh key, marking it in use until [`Self::free()`] is called with it.
    pub fn next(&mut self) -> Result<K, KeyOverflowError> {
        if self.remaining() == K::Id::zero() {
            return Err(KeyOverflowError);
        }

        let mut id = self.last_id;
        loop {
            id = id.wrapping_add(&K::Id::one());
            if !self.live.contains(&id) {
                break;
            }
        }

        self.last_id = id;
        self.live.insert(id);
        Ok(K::new(id))
    }

    /// Mark a key as no longer in use.
    /// The id is only handed out again once the counter has wrapped around.
    pub fn free(&mut self, key: K) -> Result<(), UnknownKeyError<K>> {
        if self.live.remove(&key.id()) {
            Ok(())
        } else {
            Err(UnknownKeyError { key })
        }
    }

    /// Mark a specific key as in use, e.g. while reconstructing deleted state.
    pub fn reserve(&mut self, key: K) -> Result<(), KeyCollisionError<K>> {
        if self.live.insert(key.id()) {
            Ok(())
        } else {
            Err(KeyCollisionError { key })
        }
    }

    pub fn in_use(&self, key: K) -> bool {
        self.live.contains(&key.id())
    }
}
impl<K> Default for KeyGenerator<K>
where
    K: Key,
    K::Id: Bounded + Zero + One + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct KeyOverflowError;
impl Display for KeyOverflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "The max number of keys has been exceeded")
    }
}
impl Error for KeyOverflowError {}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownKeyError<K: Key> {
    pub key: K,
}
impl<K: Key> Display for UnknownKeyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key not present: {:?}", self.key)
    }
}
impl<K: Key> Error for UnknownKeyError<K> {}

#[derive(Debug, PartialEq, Eq)]
pub struct KeyCollisionError<K: Key> {
    pub key: K,
}
impl<K: Key> Display for KeyCollisionError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key already present: {:?}", self.key)
    }
}
impl<K: Key> Error for KeyCollisionError<K> {}

#[cfg(test)]
mod tests {
    use super::*;

    key_type!(struct TestKey(u8));

    #[test]
    fn fresh_keys_are_unique() {
        let mut generator = KeyGenerator::<TestKey>::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generator.next().unwrap()));
        }
    }

    #[test]
    fn free_makes_room() {
        let mut generator = KeyGenerator::<TestKey>::new();
        let key = generator.next().unwrap();
        generator.free(key).unwrap();
        assert_eq!(generator.remaining(), u8::MAX);
    }

    #[test]
    fn free_unknown() {
        let mut generator = KeyGenerator::<TestKey>::new();
        let result = generator.free(TestKey(6));
        assert_eq!(result, Err(UnknownKeyError { key: TestKey(6) }));
    }

    #[test]
    fn freed_key_is_not_reused_immediately() {
        let mut generator = KeyGenerator::<TestKey>::new();
        let key = generator.next().unwrap();
        generator.free(key).unwrap();
        let next = generator.next().unwrap();
        assert_ne!(key, next);
        assert_eq!(generator.reserve(key), Ok(()));
    }

    #[test]
    fn reserve_collision() {
        let mut generator = KeyGenerator::<TestKey>::new();
        let key = generator.next().unwrap();
        assert_eq!(generator.reserve(key), Err(KeyCollisionError { key }));
    }

    #[test]
    fn from_keys_skips_reserved() {
        let generator = KeyGenerator::from_keys([TestKey(0), TestKey(1), TestKey(5)]);
        assert!(generator.in_use(TestKey(5)));
        assert!(!generator.in_use(TestKey(2)));
    }

    #[test]
    fn overflow() {
        let mut generator = KeyGenerator::<TestKey>::new();
        for _ in 0..255 {
            generator.next().unwrap();
        }
        assert_eq!(generator.next(), Err(KeyOverflowError));
    }
}
