//! Open-addressed hash table, keyed by interned string references, used
//! both as a map (globals, fields, methods) and as a set (string
//! interning, where values are always `Nil`).

use crate::object::ObjRef;
use crate::value::Value;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Clone, Copy)]
enum Slot {
  Empty,
  Tombstone,
  Live(ObjRef, Value),
}

pub struct Table {
  entries: Vec<Slot>,
  /// live entries + tombstones, per spec's definition of `len`.
  count: usize,
}

impl Table {
  pub fn new() -> Self {
    Table {
      entries: Vec::new(),
      count: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  fn capacity(&self) -> usize {
    self.entries.len()
  }

  /// Find the slot `key` should occupy: the live slot if present, else the
  /// first tombstone seen along the probe sequence (so a subsequent insert
  /// reuses it), else the first empty slot.
  fn find_slot(entries: &[Slot], capacity: usize, key: ObjRef) -> usize {
    let hash = key.as_string().hash;
    let mut index = (hash as usize) % capacity;
    let mut tombstone: Option<usize> = None;
    loop {
      match &entries[index] {
        Slot::Empty => return tombstone.unwrap_or(index),
        Slot::Tombstone => {
          if tombstone.is_none() {
            tombstone = Some(index);
          }
        }
        Slot::Live(k, _) => {
          if k.identity_eq(key) {
            return index;
          }
        }
      }
      index = (index + 1) % capacity;
    }
  }

  fn grow(&mut self) {
    let new_capacity = if self.entries.is_empty() {
      INITIAL_CAPACITY
    } else {
      self.entries.len() * 2
    };
    let mut new_entries = vec![Slot::Empty; new_capacity];
    let mut live_count = 0;
    for slot in &self.entries {
      if let Slot::Live(key, value) = slot {
        let index = Self::find_slot(&new_entries, new_capacity, *key);
        new_entries[index] = Slot::Live(*key, *value);
        live_count += 1;
      }
    }
    self.entries = new_entries;
    self.count = live_count;
  }

  /// Insert or overwrite. Returns `true` if this created a new key.
  pub fn set(&mut self, key: ObjRef, value: Value) -> bool {
    if self.capacity() == 0 || (self.count + 1) as f64 / self.capacity() as f64 > MAX_LOAD_FACTOR {
      self.grow();
    }
    let index = Self::find_slot(&self.entries, self.capacity(), key);
    let is_new = !matches!(self.entries[index], Slot::Live(_, _));
    let was_empty = matches!(self.entries[index], Slot::Empty);
    self.entries[index] = Slot::Live(key, value);
    if is_new && was_empty {
      self.count += 1;
    }
    is_new
  }

  pub fn get(&self, key: ObjRef) -> Option<Value> {
    if self.capacity() == 0 {
      return None;
    }
    match self.entries[Self::find_slot(&self.entries, self.capacity(), key)] {
      Slot::Live(_, v) => Some(v),
      _ => None,
    }
  }

  pub fn delete(&mut self, key: ObjRef) -> bool {
    if self.capacity() == 0 {
      return false;
    }
    let index = Self::find_slot(&self.entries, self.capacity(), key);
    if matches!(self.entries[index], Slot::Live(_, _)) {
      self.entries[index] = Slot::Tombstone;
      true
    } else {
      false
    }
  }

  /// Look up a string by content/hash without already having an `ObjRef`
  /// for it — used by the interner to decide whether to allocate.
  pub fn find_string(&self, s: &str, hash: u32) -> Option<ObjRef> {
    if self.capacity() == 0 {
      return None;
    }
    let capacity = self.capacity();
    let mut index = (hash as usize) % capacity;
    loop {
      match &self.entries[index] {
        Slot::Empty => return None,
        Slot::Tombstone => {}
        Slot::Live(k, _) => {
          let ks = k.as_string();
          if ks.hash == hash && ks.bytes.as_ref() == s {
            return Some(*k);
          }
        }
      }
      index = (index + 1) % capacity;
    }
  }

  /// Copy every entry of `self` into `dst`, overriding `dst`'s existing
  /// values for shared keys. Mirrors clox's `tableAddAll`.
  pub fn add_all(&self, dst: &mut Table) {
    for slot in &self.entries {
      if let Slot::Live(key, value) = slot {
        dst.set(*key, *value);
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
    self.entries.iter().filter_map(|slot| match slot {
      Slot::Live(k, v) => Some((*k, *v)),
      _ => None,
    })
  }

  /// Remove every key for which `keep` returns `false`. Used by the GC's
  /// weak-interned-string sweep.
  pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjRef) -> bool) {
    for slot in &mut self.entries {
      if let Slot::Live(key, _) = slot {
        if !keep(*key) {
          *slot = Slot::Tombstone;
        }
      }
    }
  }
}

impl Default for Table {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object::Heap;

  #[test]
  fn set_get_delete_roundtrip() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let k1 = heap.copy_string("alpha");
    let k2 = heap.copy_string("beta");

    assert!(table.set(k1, Value::Number(1.0)));
    assert!(table.set(k2, Value::Number(2.0)));
    assert!(!table.set(k1, Value::Number(10.0)), "re-set is not a new key");

    assert_eq!(table.get(k1), Some(Value::Number(10.0)));
    assert_eq!(table.get(k2), Some(Value::Number(2.0)));

    assert!(table.delete(k1));
    assert_eq!(table.get(k1), None);
    // deleting again reports absence
    assert!(!table.delete(k1));
    // beta survives a delete of a different key (tombstone probing)
    assert_eq!(table.get(k2), Some(Value::Number(2.0)));
  }

  #[test]
  fn load_factor_never_exceeds_three_quarters() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    for i in 0..200 {
      let key = heap.copy_string(&format!("key{i}"));
      table.set(key, Value::Number(i as f64));
      assert!(table.len() as f64 / (table_capacity(&table) as f64) <= 0.75);
    }
  }

  #[test]
  fn add_all_unions_with_src_overriding() {
    let mut heap = Heap::new();
    let mut src = Table::new();
    let mut dst = Table::new();
    let a = heap.copy_string("a");
    let b = heap.copy_string("b");
    dst.set(a, Value::Number(1.0));
    src.set(a, Value::Number(99.0));
    src.set(b, Value::Number(2.0));

    src.add_all(&mut dst);

    assert_eq!(dst.get(a), Some(Value::Number(99.0)));
    assert_eq!(dst.get(b), Some(Value::Number(2.0)));
  }

  fn table_capacity(t: &Table) -> usize {
    t.entries.len()
  }
}
