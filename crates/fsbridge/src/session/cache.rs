//! Typed key/value storage that lives as long as a session.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A key whose value type is fixed at compile time.
///
/// Two keys with the same name but different value types never collide.
pub struct CacheKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CacheKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for CacheKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CacheKey<T> {}

impl<T> fmt::Debug for CacheKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.name).finish()
    }
}

#[derive(Default)]
pub struct SessionCache {
    entries: HashMap<(TypeId, &'static str), Box<dyn Any + Send>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the one it replaced.
    pub fn store<T: Any + Send>(&mut self, key: CacheKey<T>, value: T) -> Option<T> {
        self.entries
            .insert((TypeId::of::<T>(), key.name), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn retrieve<T: Any + Send>(&self, key: CacheKey<T>) -> Option<&T> {
        self.entries
            .get(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn retrieve_mut<T: Any + Send>(&mut self, key: CacheKey<T>) -> Option<&mut T> {
        self.entries
            .get_mut(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove a value and hand it back.
    pub fn invalidate<T: Any + Send>(&mut self, key: CacheKey<T>) -> Option<T> {
        self.entries
            .remove(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.keys().map(|(_, name)| name))
            .finish()
    }
}
