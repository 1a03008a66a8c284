//! Tri-color mark-sweep collection. Lives as an `impl Vm` block because the
//! full root set — value stack, call frames, open upvalues, globals, and
//! the in-progress compiler scopes — only exists together on `Vm`.

use crate::object::{Heap, ObjKind, ObjRef, UpvalueState};
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
  /// Called after every allocation. Collects when the heap has grown past
  /// its threshold, or unconditionally under `stress-gc` (used by tests to
  /// shake out missing roots).
  pub(crate) fn maybe_collect(&mut self) {
    if cfg!(feature = "stress-gc") || self.heap.bytes_allocated > self.heap.next_gc {
      self.collect_garbage();
    }
  }

  fn collect_garbage(&mut self) {
    #[cfg(feature = "log-gc")]
    let before = self.heap.bytes_allocated;
    #[cfg(feature = "log-gc")]
    self.sink.debug(format_args!("gc begin"));

    let mut gray = Vec::new();
    self.mark_roots(&mut gray);
    while let Some(obj) = gray.pop() {
      Self::blacken_object(obj, &mut gray);
    }
    self.heap.strings.retain_keys(|k| k.is_marked());
    self.sweep();
    self.heap.next_gc = self.heap.bytes_allocated * 2;

    #[cfg(feature = "log-gc")]
    self.sink.debug(format_args!(
      "gc end: {before} -> {} bytes (next at {})",
      self.heap.bytes_allocated, self.heap.next_gc
    ));
  }

  fn mark_roots(&mut self, gray: &mut Vec<ObjRef>) {
    for &v in &self.stack {
      Self::mark_value(v, gray);
    }
    for frame in &self.frames {
      Self::mark_object(frame.closure, gray);
    }
    let mut up = self.open_upvalues;
    while let Some(u) = up {
      Self::mark_object(u, gray);
      up = u.as_upvalue().next_open.get();
    }
    for (key, value) in self.globals.iter() {
      Self::mark_object(key, gray);
      Self::mark_value(value, gray);
    }
    // The `init` sentinel is looked up by identity on every `CLASS`
    // instantiation and isn't otherwise reachable once user code stops
    // mentioning an `init` method by name.
    Self::mark_object(self.init_string, gray);
    for scope in &self.compiler_scopes {
      if let Some(name) = scope.name() {
        Self::mark_object(name, gray);
      }
      for constant in &scope.chunk().constants {
        Self::mark_value(*constant, gray);
      }
    }
  }

  fn mark_value(value: Value, gray: &mut Vec<ObjRef>) {
    if let Value::Obj(obj) = value {
      Self::mark_object(obj, gray);
    }
  }

  fn mark_object(obj: ObjRef, gray: &mut Vec<ObjRef>) {
    if obj.is_marked() {
      return;
    }
    obj.set_marked(true);
    gray.push(obj);
  }

  fn blacken_object(obj: ObjRef, gray: &mut Vec<ObjRef>) {
    match obj.kind() {
      ObjKind::String(_) | ObjKind::Native(_) => {}
      ObjKind::Function(f) => {
        if let Some(name) = f.name {
          Self::mark_object(name, gray);
        }
        for constant in &f.chunk.constants {
          Self::mark_value(*constant, gray);
        }
      }
      ObjKind::Closure(c) => {
        Self::mark_object(c.function, gray);
        for up in &c.upvalues {
          Self::mark_object(*up, gray);
        }
      }
      ObjKind::Upvalue(u) => {
        if let UpvalueState::Closed(v) = u.state.get() {
          Self::mark_value(v, gray);
        }
      }
      ObjKind::Class(c) => {
        Self::mark_object(c.name, gray);
        for (key, value) in c.methods.borrow().iter() {
          Self::mark_object(key, gray);
          Self::mark_value(value, gray);
        }
      }
      ObjKind::Instance(i) => {
        Self::mark_object(i.class, gray);
        for (key, value) in i.fields.borrow().iter() {
          Self::mark_object(key, gray);
          Self::mark_value(value, gray);
        }
      }
      ObjKind::BoundMethod(b) => {
        Self::mark_value(b.receiver, gray);
        Self::mark_object(b.method, gray);
      }
    }
  }

  /// Walk the intrusive all-objects list, unlinking and freeing anything
  /// left unmarked, and clearing the mark bit on everything that survives
  /// for the next cycle.
  fn sweep(&mut self) {
    let mut prev: Option<ObjRef> = None;
    let mut current = self.heap.objects();
    while let Some(obj) = current {
      let next = obj.next();
      if obj.is_marked() {
        obj.set_marked(false);
        prev = Some(obj);
      } else {
        match prev {
          Some(p) => p.set_next(next),
          None => self.heap.unlink_head(next),
        }
        self.heap.bytes_allocated -= obj.approx_size();
        // SAFETY: unmarked after a full trace from every root means
        // nothing reachable still points at `obj`.
        unsafe { Heap::free(obj) };
      }
      current = next;
    }
  }
}
