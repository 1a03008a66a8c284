//! Call-frame stack, value stack, and the opcode dispatch loop.

use crate::chunk::OpCode;
use crate::compiler::{self, FunctionScope};
use crate::error::{InterpretResult, RuntimeError, TraceFrame};
use crate::object::{Heap, LClosure, LFunction, NativeFn, ObjKind, ObjRef, UpvalueState};
use crate::sink::DiagnosticSink;
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

pub(crate) struct CallFrame {
  pub(crate) closure: ObjRef,
  ip: usize,
  base: usize,
}

pub struct Vm {
  pub(crate) heap: Heap,
  pub(crate) globals: Table,
  pub(crate) stack: Vec<Value>,
  pub(crate) frames: Vec<CallFrame>,
  pub(crate) open_upvalues: Option<ObjRef>,
  pub(crate) init_string: ObjRef,
  pub(crate) sink: Box<dyn DiagnosticSink>,
  pub(crate) compiler_scopes: Vec<FunctionScope>,
  /// Set from the `CORVID_TRACE` environment variable; when true, each
  /// function's chunk is disassembled to stderr as soon as it finishes
  /// compiling.
  pub(crate) trace: bool,
}

impl Vm {
  pub fn new(sink: Box<dyn DiagnosticSink>) -> Self {
    let mut heap = Heap::new();
    let init_string = heap.copy_string("init");
    let mut globals = Table::new();
    let clock_name = heap.copy_string("clock");
    let clock_native = heap.alloc_native(clock_name, 0, crate::builtins::clock as NativeFn);
    globals.set(clock_name, Value::Obj(clock_native));

    Vm {
      heap,
      globals,
      stack: Vec::new(),
      frames: Vec::new(),
      open_upvalues: None,
      init_string,
      sink,
      compiler_scopes: Vec::new(),
      trace: std::env::var_os("CORVID_TRACE").is_some(),
    }
  }

  pub fn interpret(&mut self, source: &str) -> InterpretResult {
    let Some(function) = compiler::compile(self, source) else {
      return InterpretResult::CompileError;
    };

    self.stack.push(Value::Obj(function));
    let closure = self.alloc_closure(LClosure {
      function,
      upvalues: Vec::new(),
    });
    self.stack.pop();
    self.stack.push(Value::Obj(closure));
    self.frames.push(CallFrame {
      closure,
      ip: 0,
      base: 0,
    });

    match self.run() {
      Ok(()) => InterpretResult::Ok,
      Err(err) => {
        self.sink.error(format_args!("{err}"));
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
        InterpretResult::RuntimeError
      }
    }
  }

  // --- allocation wrappers: every entry point that may grow the heap goes
  // through here so `maybe_collect` always sees the full root set. ---

  /// Runs `maybe_collect` with `obj` held on the value stack so a
  /// collection triggered by this very allocation can't sweep it before
  /// the caller has anywhere else to root it from (mirrors clox's
  /// push/pop sandwich around risky table insertions).
  fn protect_and_maybe_collect(&mut self, obj: ObjRef) -> ObjRef {
    self.stack.push(Value::Obj(obj));
    self.maybe_collect();
    self.stack.pop();
    obj
  }

  pub(crate) fn intern_string(&mut self, s: &str) -> ObjRef {
    let obj = self.heap.copy_string(s);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn take_string(&mut self, s: String) -> ObjRef {
    let obj = self.heap.take_string(s);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn alloc_function(&mut self, f: LFunction) -> ObjRef {
    let obj = self.heap.alloc_function(f);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn alloc_closure(&mut self, c: LClosure) -> ObjRef {
    let obj = self.heap.alloc_closure(c);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
    let obj = self.heap.alloc_class(name);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
    let obj = self.heap.alloc_instance(class);
    self.protect_and_maybe_collect(obj)
  }

  pub(crate) fn alloc_bound_method(&mut self, receiver: Value, method: ObjRef) -> ObjRef {
    let obj = self.heap.alloc_bound_method(receiver, method);
    self.protect_and_maybe_collect(obj)
  }

  // --- stack helpers --------------------------------------------------

  fn push(&mut self, value: Value) {
    self.stack.push(value);
  }

  fn pop(&mut self) -> Value {
    self.stack.pop().expect("value stack underflow")
  }

  fn peek(&self, distance: usize) -> Value {
    self.stack[self.stack.len() - 1 - distance]
  }

  fn frame(&self) -> &CallFrame {
    self.frames.last().expect("no active call frame")
  }

  fn frame_mut(&mut self) -> &mut CallFrame {
    self.frames.last_mut().expect("no active call frame")
  }

  fn read_byte(&mut self) -> u8 {
    let closure = self.frame().closure;
    let ip = self.frame().ip;
    let byte = closure.as_closure().function.as_function().chunk.code[ip];
    self.frame_mut().ip += 1;
    byte
  }

  fn read_u16(&mut self) -> u16 {
    let hi = self.read_byte() as u16;
    let lo = self.read_byte() as u16;
    (hi << 8) | lo
  }

  fn read_constant(&mut self) -> Value {
    let idx = self.read_byte();
    let closure = self.frame().closure;
    closure.as_closure().function.as_function().chunk.constants[idx as usize]
  }

  fn read_string(&mut self) -> ObjRef {
    self.read_constant().as_obj().expect("constant is not a string")
  }

  // --- open upvalues ----------------------------------------------------

  fn capture_upvalue(&mut self, location: usize) -> ObjRef {
    let mut prev: Option<ObjRef> = None;
    let mut current = self.open_upvalues;
    while let Some(up) = current {
      let loc = match up.as_upvalue().state.get() {
        UpvalueState::Open(l) => l,
        UpvalueState::Closed(_) => unreachable!("closed upvalue in open list"),
      };
      if loc <= location {
        break;
      }
      prev = Some(up);
      current = up.as_upvalue().next_open.get();
    }

    if let Some(up) = current {
      if let UpvalueState::Open(loc) = up.as_upvalue().state.get() {
        if loc == location {
          return up;
        }
      }
    }

    let created = self.heap.alloc_upvalue(location);
    created.as_upvalue().next_open.set(current);
    match prev {
      None => self.open_upvalues = Some(created),
      Some(p) => p.as_upvalue().next_open.set(Some(created)),
    }
    // Spliced into the open-upvalue list (a GC root) above, so it's safe
    // to check for a collection now.
    self.maybe_collect();
    created
  }

  fn close_upvalues(&mut self, threshold: usize) {
    while let Some(up) = self.open_upvalues {
      let loc = match up.as_upvalue().state.get() {
        UpvalueState::Open(l) => l,
        UpvalueState::Closed(_) => break,
      };
      if loc < threshold {
        break;
      }
      let value = self.stack[loc];
      up.as_upvalue().state.set(UpvalueState::Closed(value));
      self.open_upvalues = up.as_upvalue().next_open.get();
      up.as_upvalue().next_open.set(None);
    }
  }

  fn read_upvalue(&self, up: ObjRef) -> Value {
    match up.as_upvalue().state.get() {
      UpvalueState::Open(loc) => self.stack[loc],
      UpvalueState::Closed(v) => v,
    }
  }

  fn write_upvalue(&mut self, up: ObjRef, value: Value) {
    match up.as_upvalue().state.get() {
      UpvalueState::Open(loc) => self.stack[loc] = value,
      UpvalueState::Closed(_) => up.as_upvalue().state.set(UpvalueState::Closed(value)),
    }
  }

  // --- calling ----------------------------------------------------------

  fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
    if let Value::Obj(o) = callee {
      match o.kind() {
        ObjKind::Closure(_) => return self.call_closure(o, arg_count),
        ObjKind::Native(_) => return self.call_native(o, arg_count),
        ObjKind::Class(_) => return self.call_class(o, arg_count),
        ObjKind::BoundMethod(_) => return self.call_bound_method(o, arg_count),
        _ => {}
      }
    }
    Err(self.runtime_error("Can only call functions and classes.".to_string()))
  }

  fn call_closure(&mut self, closure: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
    let function = closure.as_closure().function.as_function();
    if arg_count != function.arity {
      return Err(self.runtime_error(format!(
        "Expected {} arguments but got {}.",
        function.arity, arg_count
      )));
    }
    if self.frames.len() >= FRAMES_MAX {
      return Err(self.runtime_error("Stack overflow.".to_string()));
    }
    let base = self.stack.len() - arg_count as usize - 1;
    self.frames.push(CallFrame {
      closure,
      ip: 0,
      base,
    });
    Ok(())
  }

  fn call_native(&mut self, obj: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
    let func = obj.as_native().func;
    let start = self.stack.len() - arg_count as usize;
    let args: Vec<Value> = self.stack[start..].to_vec();
    match func(&args) {
      Ok(result) => {
        self.stack.truncate(start - 1);
        self.push(result);
        Ok(())
      }
      Err(message) => Err(self.runtime_error(message)),
    }
  }

  fn call_class(&mut self, class: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
    let instance = self.alloc_instance(class);
    let slot = self.stack.len() - arg_count as usize - 1;
    self.stack[slot] = Value::Obj(instance);

    let init = class.as_class().methods.borrow().get(self.init_string);
    match init {
      Some(Value::Obj(init_closure)) => self.call_closure(init_closure, arg_count),
      _ => {
        if arg_count != 0 {
          return Err(self.runtime_error(format!(
            "Expected 0 arguments but got {arg_count}."
          )));
        }
        Ok(())
      }
    }
  }

  fn call_bound_method(&mut self, bound: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
    let bm = bound.as_bound_method();
    let receiver = bm.receiver;
    let method = bm.method;
    let slot = self.stack.len() - arg_count as usize - 1;
    self.stack[slot] = receiver;
    self.call_closure(method, arg_count)
  }

  // --- arithmetic / comparisons -----------------------------------------

  fn binary_num(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
    match (self.peek(1), self.peek(0)) {
      (Value::Number(a), Value::Number(b)) => {
        self.pop();
        self.pop();
        self.push(Value::Number(f(a, b)));
        Ok(())
      }
      _ => Err(self.runtime_error("Operands must be numbers.".to_string())),
    }
  }

  fn binary_cmp(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
    match (self.peek(1), self.peek(0)) {
      (Value::Number(a), Value::Number(b)) => {
        self.pop();
        self.pop();
        self.push(Value::Bool(f(a, b)));
        Ok(())
      }
      _ => Err(self.runtime_error("Operands must be numbers.".to_string())),
    }
  }

  fn op_add(&mut self) -> Result<(), RuntimeError> {
    match (self.peek(1), self.peek(0)) {
      (Value::Number(a), Value::Number(b)) => {
        self.pop();
        self.pop();
        self.push(Value::Number(a + b));
      }
      (Value::Obj(a), Value::Obj(b))
        if matches!(a.kind(), ObjKind::String(_)) && matches!(b.kind(), ObjKind::String(_)) =>
      {
        // Operands stay on the stack (peeked, not popped) while we build
        // the concatenation, so they remain reachable if this allocation
        // triggers a collection.
        let mut buf = String::with_capacity(a.as_string().bytes.len() + b.as_string().bytes.len());
        buf.push_str(&a.as_string().bytes);
        buf.push_str(&b.as_string().bytes);
        let result = self.take_string(buf);
        self.pop();
        self.pop();
        self.push(Value::Obj(result));
      }
      _ => {
        return Err(self.runtime_error(
          "Operands must be two numbers or two strings.".to_string(),
        ))
      }
    }
    Ok(())
  }

  // --- properties / methods ----------------------------------------------

  fn get_property(&mut self) -> Result<(), RuntimeError> {
    let name = self.read_string();
    let receiver = self.peek(0);
    let instance_ref = match receiver {
      Value::Obj(o) if matches!(o.kind(), ObjKind::Instance(_)) => o,
      _ => return Err(self.runtime_error("Only instances have properties.".to_string())),
    };
    let field = instance_ref.as_instance().fields.borrow().get(name);
    if let Some(v) = field {
      self.pop();
      self.push(v);
      return Ok(());
    }
    let class = instance_ref.as_instance().class;
    let method = class.as_class().methods.borrow().get(name);
    match method {
      Some(Value::Obj(m)) => {
        let bound = self.alloc_bound_method(receiver, m);
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
      }
      _ => Err(self.runtime_error(format!(
        "Undefined property '{}'.",
        name.as_string().bytes
      ))),
    }
  }

  fn set_property(&mut self) -> Result<(), RuntimeError> {
    let name = self.read_string();
    let value = self.peek(0);
    let receiver = self.peek(1);
    let instance_ref = match receiver {
      Value::Obj(o) if matches!(o.kind(), ObjKind::Instance(_)) => o,
      _ => return Err(self.runtime_error("Only instances have fields.".to_string())),
    };
    instance_ref.as_instance().fields.borrow_mut().set(name, value);
    self.pop();
    self.pop();
    self.push(value);
    Ok(())
  }

  fn define_method(&mut self) {
    let name = self.read_string();
    let method = self.pop();
    if let Value::Obj(class) = self.peek(0) {
      class.as_class().methods.borrow_mut().set(name, method);
    }
  }

  // --- errors -------------------------------------------------------------

  fn runtime_error(&self, message: String) -> RuntimeError {
    let mut trace = Vec::with_capacity(self.frames.len());
    for frame in self.frames.iter().rev() {
      let function = frame.closure.as_closure().function.as_function();
      let line = function.chunk.line_at(frame.ip.saturating_sub(1));
      let function_name = function.name.map(|n| n.as_string().bytes.to_string());
      trace.push(TraceFrame { line, function_name });
    }
    let line = trace.first().map(|t| t.line).unwrap_or(0);
    RuntimeError {
      line,
      message,
      trace,
    }
  }

  // --- dispatch loop -------------------------------------------------------

  fn run(&mut self) -> Result<(), RuntimeError> {
    loop {
      let instruction = self.read_byte();
      let op = OpCode::from_u8(instruction).expect("invalid opcode in compiled chunk");
      match op {
        OpCode::Constant => {
          let v = self.read_constant();
          self.push(v);
        }
        OpCode::Nil => self.push(Value::Nil),
        OpCode::True => self.push(Value::Bool(true)),
        OpCode::False => self.push(Value::Bool(false)),
        OpCode::Pop => {
          self.pop();
        }
        OpCode::GetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frame().base;
          self.push(self.stack[base + slot]);
        }
        OpCode::SetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frame().base;
          self.stack[base + slot] = self.peek(0);
        }
        OpCode::GetUpvalue => {
          let slot = self.read_byte() as usize;
          let up = self.frame().closure.as_closure().upvalues[slot];
          let v = self.read_upvalue(up);
          self.push(v);
        }
        OpCode::SetUpvalue => {
          let slot = self.read_byte() as usize;
          let up = self.frame().closure.as_closure().upvalues[slot];
          let v = self.peek(0);
          self.write_upvalue(up, v);
        }
        OpCode::GetGlobal => {
          let name = self.read_string();
          match self.globals.get(name) {
            Some(v) => self.push(v),
            None => {
              return Err(self.runtime_error(format!(
                "Undefined variable '{}'.",
                name.as_string().bytes
              )))
            }
          }
        }
        OpCode::DefineGlobal => {
          let name = self.read_string();
          let v = self.peek(0);
          self.globals.set(name, v);
          self.pop();
        }
        OpCode::SetGlobal => {
          let name = self.read_string();
          let v = self.peek(0);
          if self.globals.set(name, v) {
            self.globals.delete(name);
            return Err(self.runtime_error(format!(
              "Undefined variable '{}'.",
              name.as_string().bytes
            )));
          }
        }
        OpCode::GetProperty => self.get_property()?,
        OpCode::SetProperty => self.set_property()?,
        OpCode::Equal => {
          let b = self.pop();
          let a = self.pop();
          self.push(Value::Bool(a == b));
        }
        OpCode::Greater => self.binary_cmp(|a, b| a > b)?,
        OpCode::Less => self.binary_cmp(|a, b| a < b)?,
        OpCode::Add => self.op_add()?,
        OpCode::Subtract => self.binary_num(|a, b| a - b)?,
        OpCode::Multiply => self.binary_num(|a, b| a * b)?,
        OpCode::Divide => self.binary_num(|a, b| a / b)?,
        OpCode::Not => {
          let v = self.pop();
          self.push(Value::Bool(v.is_falsey()));
        }
        OpCode::Negate => match self.peek(0) {
          Value::Number(n) => {
            self.pop();
            self.push(Value::Number(-n));
          }
          _ => return Err(self.runtime_error("Operand must be a number.".to_string())),
        },
        OpCode::Print => {
          let v = self.pop();
          println!("{v}");
        }
        OpCode::Jump => {
          let offset = self.read_u16();
          self.frame_mut().ip += offset as usize;
        }
        OpCode::JumpIfFalse => {
          let offset = self.read_u16();
          if self.peek(0).is_falsey() {
            self.frame_mut().ip += offset as usize;
          }
        }
        OpCode::Loop => {
          let offset = self.read_u16();
          self.frame_mut().ip -= offset as usize;
        }
        OpCode::Call => {
          let argc = self.read_byte();
          let callee = self.peek(argc as usize);
          self.call_value(callee, argc)?;
        }
        OpCode::Closure => {
          let func_val = self.read_constant();
          let function_ref = func_val.as_obj().expect("Closure operand is not a function");
          let upvalue_count = function_ref.as_function().upvalue_count;
          let mut upvalues = Vec::with_capacity(upvalue_count as usize);
          for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            if is_local {
              let base = self.frame().base;
              upvalues.push(self.capture_upvalue(base + index));
            } else {
              let enclosing = self.frame().closure;
              upvalues.push(enclosing.as_closure().upvalues[index]);
            }
          }
          let closure_ref = self.alloc_closure(LClosure {
            function: function_ref,
            upvalues,
          });
          self.push(Value::Obj(closure_ref));
        }
        OpCode::CloseUpvalue => {
          self.close_upvalues(self.stack.len() - 1);
          self.pop();
        }
        OpCode::Class => {
          let name = self.read_string();
          let class = self.alloc_class(name);
          self.push(Value::Obj(class));
        }
        OpCode::Method => self.define_method(),
        OpCode::Return => {
          let result = self.pop();
          let frame = self.frames.pop().expect("RETURN with no active frame");
          self.close_upvalues(frame.base);
          self.stack.truncate(frame.base);
          if self.frames.is_empty() {
            return Ok(());
          }
          self.push(result);
        }
      }
    }
  }
}
