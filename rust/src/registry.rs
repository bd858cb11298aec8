use std::collections::HashMap;
use std::hash::Hash;

struct Slot<V> {
    refs: usize,
    value: V,
}

/// Reference-counted map of live subscriptions, keyed by conversation or friend id.
///
/// Owned by the sync component that opened the subscriptions. Dropping the
/// registry drops every value, which for listener registrations detaches them.
pub struct ListenerRegistry<K, V> {
    slots: HashMap<K, Slot<V>>,
}

impl<K: Eq + Hash + Clone, V> Default for ListenerRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> ListenerRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Adds a reference to `key`, creating the value with `create` only when
    /// the key is absent. Returns `true` when a new value was created.
    pub fn acquire<E>(
        &mut self,
        key: &K,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<bool, E> {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.refs += 1;
            return Ok(false);
        }
        let value = create()?;
        self.slots.insert(key.clone(), Slot { refs: 1, value });
        Ok(true)
    }

    /// Drops one reference. Returns the value once the last reference is gone.
    pub fn release(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.get_mut(key)?;
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return None;
        }
        self.slots.remove(key).map(|s| s.value)
    }

    /// Removes `key` regardless of its reference count.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|s| s.value)
    }

    pub fn clear(&mut self) -> Vec<V> {
        self.slots.drain().map(|(_, s)| s.value).collect()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.slots.get_mut(key).map(|s| &mut s.value)
    }

    pub fn refs(&self, key: &K) -> usize {
        self.slots.get(key).map_or(0, |s| s.refs)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.keys()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_reuses_value() {
        let mut reg: ListenerRegistry<String, u32> = ListenerRegistry::new();
        let key = "a1_b1".to_string();
        assert_eq!(reg.acquire(&key, || Ok::<_, ()>(7)), Ok(true));
        assert_eq!(
            reg.acquire(&key, || -> Result<u32, ()> { panic!("must reuse") }),
            Ok(false)
        );
        assert_eq!(reg.refs(&key), 2);
        assert_eq!(reg.release(&key), None);
        assert_eq!(reg.release(&key), Some(7));
        assert_eq!(reg.release(&key), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn failed_create_leaves_no_entry() {
        let mut reg: ListenerRegistry<&str, u32> = ListenerRegistry::new();
        assert_eq!(reg.acquire(&"k", || Err("boom")), Err("boom"));
        assert!(!reg.contains(&"k"));
    }

    #[test]
    fn clear_returns_everything() {
        let mut reg: ListenerRegistry<&str, u32> = ListenerRegistry::new();
        reg.acquire(&"a", || Ok::<_, ()>(1)).unwrap();
        reg.acquire(&"b", || Ok::<_, ()>(2)).unwrap();
        let mut all = reg.clear();
        all.sort();
        assert_eq!(all, vec![1, 2]);
        assert_eq!(reg.len(), 0);
    }
}
