use std::rc::Rc;

use crate::object::ObjString;

const MAX_LOAD: f64 = 0.75;

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(Rc<ObjString>, V),
}

/// An open-addressed hash table with linear probing, keyed by interned
/// strings. Used for globals (`Table<Value>`) and class method tables
/// (`Table<Rc<ObjClosure>>`); the string pool itself uses `Table<()>` as a
/// set, relying on `find_string` to look entries up by raw content before an
/// `ObjString` has been allocated for them.
pub struct Table<V> {
    slots: Vec<Slot<V>>,
    count: usize,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(..)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn find_slot(slots: &[Slot<V>], key: &Rc<ObjString>) -> usize {
        let capacity = slots.len();
        let mut index = (key.hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &slots[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if k.hash == key.hash && k.chars == key.chars {
                        return index;
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.slots.is_empty() {
            8
        } else {
            self.slots.len() * 2
        };
        let mut new_slots: Vec<Slot<V>> = Vec::with_capacity(new_capacity);
        new_slots.resize_with(new_capacity, || Slot::Empty);

        let old_slots = std::mem::replace(&mut self.slots, Vec::new());
        self.count = 0;
        for slot in old_slots {
            if let Slot::Occupied(key, value) = slot {
                let index = Self::find_slot(&new_slots, &key);
                new_slots[index] = Slot::Occupied(key, value);
                self.count += 1;
            }
        }
        self.slots = new_slots;
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<&V> {
        if self.slots.is_empty() {
            return None;
        }
        let index = Self::find_slot(&self.slots, key);
        match &self.slots[index] {
            Slot::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if this inserted a brand new key.
    pub fn set(&mut self, key: Rc<ObjString>, value: V) -> bool {
        if self.count + 1 > (self.capacity() as f64 * MAX_LOAD) as usize {
            self.grow();
        }
        let index = Self::find_slot(&self.slots, &key);
        let is_new = !matches!(self.slots[index], Slot::Occupied(..));
        if is_new {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, value);
        is_new
    }

    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let index = Self::find_slot(&self.slots, key);
        if matches!(self.slots[index], Slot::Occupied(..)) {
            self.slots[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<ObjString>, &V)> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }

    /// Drops every entry whose key fails `keep`. Used by the GC to purge
    /// string-pool members that were not marked during the trace phase.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&Rc<ObjString>) -> bool) {
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(k, _) = slot {
                if !keep(k) {
                    *slot = Slot::Tombstone;
                }
            }
        }
    }

    /// Looks up an interned string by raw content, without needing an
    /// `Rc<ObjString>` constructed ahead of time. Only meaningful for tables
    /// used as string-interning sets (`Table<()>`), but kept generic since
    /// the probing logic is identical.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.slots.is_empty() {
            return None;
        }
        let capacity = self.slots.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _) if k.hash == hash && k.chars == chars => {
                    return Some(Rc::clone(k));
                }
                _ => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<ObjString> {
        Rc::new(ObjString::new(s.to_string()))
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut table: Table<i32> = Table::new();
        assert!(table.set(key("a"), 1));
        assert!(table.set(key("b"), 2));
        assert_eq!(table.get(&key("a")), Some(&1));
        assert_eq!(table.get(&key("b")), Some(&2));
        assert_eq!(table.get(&key("c")), None);
    }

    #[test]
    fn overwrite_is_not_a_new_key() {
        let mut table: Table<i32> = Table::new();
        assert!(table.set(key("a"), 1));
        assert!(!table.set(key("a"), 2));
        assert_eq!(table.get(&key("a")), Some(&2));
    }

    #[test]
    fn delete_then_reinsert() {
        let mut table: Table<i32> = Table::new();
        table.set(key("a"), 1);
        assert!(table.delete(&key("a")));
        assert_eq!(table.get(&key("a")), None);
        assert!(table.set(key("a"), 9));
        assert_eq!(table.get(&key("a")), Some(&9));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table: Table<i32> = Table::new();
        for i in 0..100 {
            table.set(key(&format!("k{i}")), i);
        }
        for i in 0..100 {
            assert_eq!(table.get(&key(&format!("k{i}"))), Some(&i));
        }
    }

    #[test]
    fn find_string_matches_by_content() {
        let mut table: Table<()> = Table::new();
        let s = key("hello");
        table.set(Rc::clone(&s), ());
        let found = table.find_string("hello", s.hash).unwrap();
        assert!(Rc::ptr_eq(&found, &s));
        assert!(table.find_string("nope", hash_of("nope")).is_none());
    }

    fn hash_of(s: &str) -> u32 {
        ObjString::new(s.to_string()).hash
    }
}
