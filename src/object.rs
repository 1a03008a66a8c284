//! The heap object model: a tagged variant with a common header (mark bit,
//! intrusive `next` pointer), reached through an opaque, `Copy` handle
//! (`ObjRef`). The GC is the sole authority on object lifetime; nothing
//! else in the crate owns a heap object outright.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// An opaque handle to a heap object. Equality is pointer identity.
#[derive(Clone, Copy)]
pub struct ObjRef(NonNull<Obj>);

impl ObjRef {
  /// # Safety
  /// `ptr` must point at a live `Obj` for the lifetime of every use of the
  /// returned handle; this holds as long as the handle is only ever
  /// produced by `Heap`/`Vm` allocation and only ever outlives a sweep that
  /// would free it because it is reachable from a root.
  unsafe fn from_raw(ptr: NonNull<Obj>) -> Self {
    ObjRef(ptr)
  }

  fn obj(&self) -> &Obj {
    // SAFETY: see `from_raw`.
    unsafe { self.0.as_ref() }
  }

  pub fn identity_eq(&self, other: ObjRef) -> bool {
    self.0 == other.0
  }

  pub fn is_marked(&self) -> bool {
    self.obj().marked.get()
  }

  pub fn set_marked(&self, marked: bool) {
    self.obj().marked.set(marked);
  }

  pub(crate) fn next(&self) -> Option<ObjRef> {
    self.obj().next.get()
  }

  pub(crate) fn set_next(&self, next: Option<ObjRef>) {
    self.obj().next.set(next);
  }

  pub fn kind(&self) -> &ObjKind {
    &self.obj().kind
  }

  pub fn type_name(&self) -> &'static str {
    match self.kind() {
      ObjKind::String(_) => "string",
      ObjKind::Function(_) => "function",
      ObjKind::Closure(_) => "closure",
      ObjKind::Upvalue(_) => "upvalue",
      ObjKind::Native(_) => "native function",
      ObjKind::Class(_) => "class",
      ObjKind::Instance(_) => "instance",
      ObjKind::BoundMethod(_) => "bound method",
    }
  }

  pub fn as_string(&self) -> &LString {
    match self.kind() {
      ObjKind::String(s) => s,
      _ => unreachable!("ObjRef::as_string on a non-string object"),
    }
  }

  pub fn as_function(&self) -> &LFunction {
    match self.kind() {
      ObjKind::Function(f) => f,
      _ => unreachable!("ObjRef::as_function on a non-function object"),
    }
  }

  pub fn as_closure(&self) -> &LClosure {
    match self.kind() {
      ObjKind::Closure(c) => c,
      _ => unreachable!("ObjRef::as_closure on a non-closure object"),
    }
  }

  pub fn as_upvalue(&self) -> &LUpvalue {
    match self.kind() {
      ObjKind::Upvalue(u) => u,
      _ => unreachable!("ObjRef::as_upvalue on a non-upvalue object"),
    }
  }

  pub fn as_native(&self) -> &LNative {
    match self.kind() {
      ObjKind::Native(n) => n,
      _ => unreachable!("ObjRef::as_native on a non-native object"),
    }
  }

  pub fn as_class(&self) -> &LClass {
    match self.kind() {
      ObjKind::Class(c) => c,
      _ => unreachable!("ObjRef::as_class on a non-class object"),
    }
  }

  pub fn as_instance(&self) -> &LInstance {
    match self.kind() {
      ObjKind::Instance(i) => i,
      _ => unreachable!("ObjRef::as_instance on a non-instance object"),
    }
  }

  pub fn as_bound_method(&self) -> &LBoundMethod {
    match self.kind() {
      ObjKind::BoundMethod(b) => b,
      _ => unreachable!("ObjRef::as_bound_method on a non-bound-method object"),
    }
  }

  /// Size in bytes this object counts for against `bytesAllocated`. Coarse
  /// (header + a rough estimate of variable-length payloads) — exactness
  /// doesn't matter, only that it tracks real growth so the GC trigger
  /// fires at a sane cadence.
  pub(crate) fn approx_size(&self) -> usize {
    let payload = match self.kind() {
      ObjKind::String(s) => s.bytes.len(),
      ObjKind::Function(f) => f.chunk.approx_size(),
      ObjKind::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
      ObjKind::Upvalue(_) => 0,
      ObjKind::Native(_) => 0,
      ObjKind::Class(_) => 0,
      ObjKind::Instance(_) => 0,
      ObjKind::BoundMethod(_) => 0,
    };
    std::mem::size_of::<Obj>() + payload
  }
}

impl fmt::Display for ObjRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind() {
      ObjKind::String(s) => write!(f, "{}", s.bytes),
      ObjKind::Function(func) => match func.name {
        Some(name) => write!(f, "<fn {}>", name.as_string().bytes),
        None => write!(f, "<script>"),
      },
      ObjKind::Closure(c) => fmt::Display::fmt(&c.function, f),
      ObjKind::Upvalue(_) => write!(f, "upvalue"),
      ObjKind::Native(n) => write!(f, "<native fn {}>", n.name.as_string().bytes),
      ObjKind::Class(c) => write!(f, "{}", c.name.as_string().bytes),
      ObjKind::Instance(i) => write!(f, "{} instance", i.class.as_string().bytes),
      ObjKind::BoundMethod(b) => fmt::Display::fmt(&b.method, f),
    }
  }
}

/// The common header every heap object carries, plus its payload.
pub struct Obj {
  marked: Cell<bool>,
  next: Cell<Option<ObjRef>>,
  kind: ObjKind,
}

pub enum ObjKind {
  String(LString),
  Function(LFunction),
  Closure(LClosure),
  Upvalue(LUpvalue),
  Native(LNative),
  Class(LClass),
  Instance(LInstance),
  BoundMethod(LBoundMethod),
}

pub struct LString {
  pub hash: u32,
  pub bytes: Box<str>,
}

pub struct LFunction {
  pub arity: u8,
  pub upvalue_count: u8,
  pub chunk: Chunk,
  pub name: Option<ObjRef>,
}

pub struct LClosure {
  pub function: ObjRef,
  pub upvalues: Vec<ObjRef>,
}

#[derive(Clone, Copy)]
pub enum UpvalueState {
  /// Points at a live slot in the VM's value stack, by index.
  Open(usize),
  Closed(Value),
}

pub struct LUpvalue {
  pub state: Cell<UpvalueState>,
  /// Link to the next node in the VM's open-upvalue list (separate from
  /// the intrusive all-objects list used by sweep); `None` once closed.
  pub next_open: Cell<Option<ObjRef>>,
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct LNative {
  pub name: ObjRef,
  pub arity: u8,
  pub func: NativeFn,
}

pub struct LClass {
  pub name: ObjRef,
  pub methods: RefCell<Table>,
}

pub struct LInstance {
  pub class: ObjRef,
  pub fields: RefCell<Table>,
}

pub struct LBoundMethod {
  pub receiver: Value,
  pub method: ObjRef,
}

/// The allocator: an intrusive singly-linked list of every live object
/// (the sweep enumeration), plus the string-interning set and the byte
/// counters the GC trigger watches. Owned by `Vm`; see `src/gc.rs` for the
/// collection algorithm that keeps this honest.
pub struct Heap {
  objects: Option<ObjRef>,
  pub strings: Table,
  pub bytes_allocated: usize,
  pub next_gc: usize,
}

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a(bytes: &[u8]) -> u32 {
  let mut hash = FNV_OFFSET_BASIS;
  for &b in bytes {
    hash ^= b as u32;
    hash = hash.wrapping_mul(FNV_PRIME);
  }
  hash
}

impl Heap {
  pub fn new() -> Self {
    Heap {
      objects: None,
      strings: Table::new(),
      bytes_allocated: 0,
      next_gc: 1024 * 1024,
    }
  }

  pub fn objects(&self) -> Option<ObjRef> {
    self.objects
  }

  fn push(&mut self, kind: ObjKind) -> ObjRef {
    let boxed = Box::new(Obj {
      marked: Cell::new(false),
      next: Cell::new(self.objects),
      kind,
    });
    let ptr = NonNull::from(Box::leak(boxed));
    // SAFETY: `ptr` was just leaked from a `Box` and is registered below on
    // the intrusive list, so it will be reclaimed exactly once by sweep.
    let obj_ref = unsafe { ObjRef::from_raw(ptr) };
    self.bytes_allocated += obj_ref.approx_size();
    self.objects = Some(obj_ref);
    obj_ref
  }

  /// Intern a string, allocating only if this exact content isn't already
  /// in the table. Mirrors clox's `copyString`.
  pub fn copy_string(&mut self, s: &str) -> ObjRef {
    let hash = fnv1a(s.as_bytes());
    if let Some(existing) = self.strings.find_string(s, hash) {
      return existing;
    }
    let obj = self.push(ObjKind::String(LString {
      hash,
      bytes: s.into(),
    }));
    self.strings.set(obj, Value::Nil);
    obj
  }

  /// Mirrors clox's `takeString`: `s` is already an owned buffer; reuse it
  /// if this content isn't interned yet, otherwise drop it and return the
  /// canonical copy.
  pub fn take_string(&mut self, s: String) -> ObjRef {
    let hash = fnv1a(s.as_bytes());
    if let Some(existing) = self.strings.find_string(&s, hash) {
      return existing;
    }
    let obj = self.push(ObjKind::String(LString {
      hash,
      bytes: s.into_boxed_str(),
    }));
    self.strings.set(obj, Value::Nil);
    obj
  }

  pub fn alloc_function(&mut self, f: LFunction) -> ObjRef {
    self.push(ObjKind::Function(f))
  }

  pub fn alloc_closure(&mut self, c: LClosure) -> ObjRef {
    self.push(ObjKind::Closure(c))
  }

  pub fn alloc_upvalue(&mut self, location: usize) -> ObjRef {
    self.push(ObjKind::Upvalue(LUpvalue {
      state: Cell::new(UpvalueState::Open(location)),
      next_open: Cell::new(None),
    }))
  }

  pub fn alloc_native(&mut self, name: ObjRef, arity: u8, func: NativeFn) -> ObjRef {
    self.push(ObjKind::Native(LNative { name, arity, func }))
  }

  pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
    self.push(ObjKind::Class(LClass {
      name,
      methods: RefCell::new(Table::new()),
    }))
  }

  pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
    self.push(ObjKind::Instance(LInstance {
      class,
      fields: RefCell::new(Table::new()),
    }))
  }

  pub fn alloc_bound_method(&mut self, receiver: Value, method: ObjRef) -> ObjRef {
    self.push(ObjKind::BoundMethod(LBoundMethod { receiver, method }))
  }

  /// Free a single unmarked node found during sweep.
  ///
  /// # Safety
  /// `obj` must currently be unreachable from any root, and must not be
  /// touched again after this call (its backing allocation is reclaimed).
  pub(crate) unsafe fn free(obj: ObjRef) {
    drop(Box::from_raw(obj.0.as_ptr()));
  }

  pub(crate) fn unlink_head(&mut self, new_head: Option<ObjRef>) {
    self.objects = new_head;
  }
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

impl Chunk {
  pub(crate) fn approx_size(&self) -> usize {
    self.code.len() + self.lines.len() * std::mem::size_of::<u32>()
  }
}
