//! Single-pass Pratt parser and bytecode emitter. There is no AST: every
//! grammar rule emits directly into the chunk of whichever function is
//! currently being compiled.

use crate::chunk::{Chunk, OpCode};
use crate::object::ObjRef;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
enum Precedence {
  None,
  Assignment, // =
  Or,         // or
  And,        // and
  Equality,   // == !=
  Comparison, // < > <= >=
  Term,       // + -
  Factor,     // * /
  Unary,      // ! -
  Call,       // . ()
  Primary,
}

impl Precedence {
  fn next(self) -> Precedence {
    use Precedence::*;
    match self {
      None => Assignment,
      Assignment => Or,
      Or => And,
      And => Equality,
      Equality => Comparison,
      Comparison => Term,
      Term => Factor,
      Factor => Unary,
      Unary => Call,
      Call | Primary => Primary,
    }
  }
}

type ParseFn<'s, 'v> = fn(&mut Parser<'s, 'v>, bool);

struct ParseRule<'s, 'v> {
  prefix: Option<ParseFn<'s, 'v>>,
  infix: Option<ParseFn<'s, 'v>>,
  precedence: Precedence,
}

fn rule<'s, 'v>(kind: TokenKind) -> ParseRule<'s, 'v> {
  use TokenKind::*;
  let (prefix, infix, precedence): (
    Option<ParseFn<'s, 'v>>,
    Option<ParseFn<'s, 'v>>,
    Precedence,
  ) = match kind {
    LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
    Dot => (None, Some(Parser::dot), Precedence::Call),
    Minus => (
      Some(Parser::unary),
      Some(Parser::binary),
      Precedence::Term,
    ),
    Plus => (None, Some(Parser::binary), Precedence::Term),
    Slash => (None, Some(Parser::binary), Precedence::Factor),
    Star => (None, Some(Parser::binary), Precedence::Factor),
    Bang => (Some(Parser::unary), None, Precedence::None),
    BangEqual => (None, Some(Parser::binary), Precedence::Equality),
    EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
    Greater => (None, Some(Parser::binary), Precedence::Comparison),
    GreaterEqual => (None, Some(Parser::binary), Precedence::Comparison),
    Less => (None, Some(Parser::binary), Precedence::Comparison),
    LessEqual => (None, Some(Parser::binary), Precedence::Comparison),
    Ident => (Some(Parser::variable), None, Precedence::None),
    String => (Some(Parser::string), None, Precedence::None),
    Number => (Some(Parser::number), None, Precedence::None),
    And => (None, Some(Parser::and), Precedence::And),
    Or => (None, Some(Parser::or), Precedence::Or),
    False => (Some(Parser::literal), None, Precedence::None),
    Nil => (Some(Parser::literal), None, Precedence::None),
    True => (Some(Parser::literal), None, Precedence::None),
    This => (Some(Parser::this), None, Precedence::None),
    _ => (None, None, Precedence::None),
  };
  ParseRule {
    prefix,
    infix,
    precedence,
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
  Script,
  Function,
  Method,
  Initializer,
}

struct Local {
  name: String,
  depth: i32,
  is_captured: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct UpvalueDesc {
  pub index: u8,
  pub is_local: bool,
}

/// One active function-in-compilation. `Vm::compiler_scopes` is a stack of
/// these; the GC walks every scope's chunk constants (and name) as roots,
/// since nothing else references them until the enclosing `CLOSURE` opcode
/// is emitted.
pub(crate) struct FunctionScope {
  function_type: FunctionType,
  name: Option<ObjRef>,
  arity: u8,
  chunk: Chunk,
  locals: Vec<Local>,
  upvalues: Vec<UpvalueDesc>,
  scope_depth: i32,
}

impl FunctionScope {
  fn new(function_type: FunctionType, name: Option<ObjRef>) -> Self {
    let this_name = match function_type {
      FunctionType::Method | FunctionType::Initializer => "this",
      _ => "",
    };
    FunctionScope {
      function_type,
      name,
      arity: 0,
      chunk: Chunk::new(),
      locals: vec![Local {
        name: this_name.to_string(),
        depth: 0,
        is_captured: false,
      }],
      upvalues: Vec::new(),
      scope_depth: 0,
    }
  }

  pub(crate) fn chunk(&self) -> &Chunk {
    &self.chunk
  }

  pub(crate) fn name(&self) -> Option<ObjRef> {
    self.name
  }
}

struct ClassScope;

struct Parser<'src, 'vm> {
  vm: &'vm mut Vm,
  scanner: Scanner<'src>,
  previous: Token<'src>,
  current: Token<'src>,
  had_error: bool,
  panic_mode: bool,
  class_scopes: Vec<ClassScope>,
}

/// Compile `source` into a top-level script function. Returns `None` (and
/// has already reported every error through the VM's sink) if compilation
/// failed.
pub fn compile(vm: &mut Vm, source: &str) -> Option<ObjRef> {
  let dummy = Token {
    kind: TokenKind::Eof,
    lexeme: "",
    line: 0,
  };
  vm.compiler_scopes.push(FunctionScope::new(FunctionType::Script, None));
  let mut parser = Parser {
    vm,
    scanner: Scanner::new(source),
    previous: dummy,
    current: dummy,
    had_error: false,
    panic_mode: false,
    class_scopes: Vec::new(),
  };
  parser.advance();
  while !parser.check(TokenKind::Eof) {
    parser.declaration();
  }
  let had_error = parser.had_error;
  let (function, _upvalues) = end_function(parser.vm);
  if had_error {
    None
  } else {
    Some(function)
  }
}

/// Pop the innermost compiler scope, append its implicit return, and
/// allocate the finished `Function` heap object.
fn end_function(vm: &mut Vm) -> (ObjRef, Vec<UpvalueDesc>) {
  let is_initializer = vm
    .compiler_scopes
    .last()
    .map(|s| s.function_type == FunctionType::Initializer)
    .unwrap_or(false);
  {
    let scope = vm.compiler_scopes.last_mut().unwrap();
    let line = scope.chunk.lines.last().copied().unwrap_or(0);
    if is_initializer {
      scope.chunk.write_op(OpCode::GetLocal, line);
      scope.chunk.code.push(0);
      scope.chunk.lines.push(line);
    } else {
      scope.chunk.write_op(OpCode::Nil, line);
    }
    scope.chunk.write_op(OpCode::Return, line);
  }
  let scope = vm.compiler_scopes.pop().unwrap();
  let upvalue_count = scope.upvalues.len() as u8;
  if vm.trace {
    let label = match scope.name {
      Some(name) => name.as_string().bytes.to_string(),
      None => "<script>".to_string(),
    };
    crate::disasm::disassemble(&scope.chunk, &label);
  }
  let function = crate::object::LFunction {
    arity: scope.arity,
    upvalue_count,
    chunk: scope.chunk,
    name: scope.name,
  };
  (vm.alloc_function(function), scope.upvalues)
}

impl<'src, 'vm> Parser<'src, 'vm> {
  fn current_scope(&self) -> &FunctionScope {
    self.vm.compiler_scopes.last().unwrap()
  }

  fn current_scope_mut(&mut self) -> &mut FunctionScope {
    self.vm.compiler_scopes.last_mut().unwrap()
  }

  // --- token stream -------------------------------------------------

  fn advance(&mut self) {
    self.previous = self.current;
    loop {
      self.current = self.scanner.next();
      if self.current.kind != TokenKind::Err {
        break;
      }
      let msg = self.current.lexeme;
      self.error_at_current(msg);
    }
  }

  fn check(&self, kind: TokenKind) -> bool {
    self.current.kind == kind
  }

  fn match_token(&mut self, kind: TokenKind) -> bool {
    if !self.check(kind) {
      return false;
    }
    self.advance();
    true
  }

  fn consume(&mut self, kind: TokenKind, message: &str) {
    if self.current.kind == kind {
      self.advance();
      return;
    }
    self.error_at_current(message);
  }

  fn error_at_current(&mut self, message: &str) {
    let tok = self.current;
    self.error_at(tok, message);
  }

  fn error(&mut self, message: &str) {
    let tok = self.previous;
    self.error_at(tok, message);
  }

  fn error_at(&mut self, token: Token<'src>, message: &str) {
    if self.panic_mode {
      return;
    }
    self.panic_mode = true;
    self.had_error = true;
    let location = match token.kind {
      TokenKind::Eof => " at end".to_string(),
      TokenKind::Err => String::new(),
      _ => format!(" at '{}'", token.lexeme),
    };
    self
      .vm
      .sink
      .error(format_args!("[line {}]{}: {}", token.line, location, message));
  }

  fn synchronize(&mut self) {
    self.panic_mode = false;
    while self.current.kind != TokenKind::Eof {
      if self.previous.kind == TokenKind::Semicolon {
        return;
      }
      use TokenKind::*;
      match self.current.kind {
        Class | Fun | Var | For | If | While | Print | Return => return,
        _ => {}
      }
      self.advance();
    }
  }

  // --- emission -------------------------------------------------------

  fn line(&self) -> u32 {
    self.previous.line
  }

  fn emit_byte(&mut self, byte: u8) {
    let line = self.line();
    self.current_scope_mut().chunk.write_u8(byte, line);
  }

  fn emit_op(&mut self, op: OpCode) {
    self.emit_byte(op as u8);
  }

  fn emit_op_u8(&mut self, op: OpCode, operand: u8) {
    self.emit_op(op);
    self.emit_byte(operand);
  }

  fn emit_loop(&mut self, loop_start: usize) {
    self.emit_op(OpCode::Loop);
    let offset = self.current_scope().chunk.code.len() - loop_start + 2;
    if offset > u16::MAX as usize {
      self.error("Loop body too large.");
    }
    self.emit_byte(((offset >> 8) & 0xff) as u8);
    self.emit_byte((offset & 0xff) as u8);
  }

  /// Emits `op` with a placeholder 2-byte jump offset, returning the
  /// offset of the first placeholder byte to be patched later.
  fn emit_jump(&mut self, op: OpCode) -> usize {
    self.emit_op(op);
    self.emit_byte(0xff);
    self.emit_byte(0xff);
    self.current_scope().chunk.code.len() - 2
  }

  fn patch_jump(&mut self, offset: usize) {
    let jump = self.current_scope().chunk.code.len() - offset - 2;
    if jump > u16::MAX as usize {
      self.error("Too much code to jump over.");
    }
    let scope = self.current_scope_mut();
    scope.chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
    scope.chunk.code[offset + 1] = (jump & 0xff) as u8;
  }

  fn make_constant(&mut self, value: Value) -> u8 {
    if self.current_scope().chunk.constants.len() >= 256 {
      self.error("Too many constants in one function.");
      return 0;
    }
    self.current_scope_mut().chunk.add_constant(value)
  }

  fn emit_constant(&mut self, value: Value) {
    let idx = self.make_constant(value);
    self.emit_op_u8(OpCode::Constant, idx);
  }

  fn identifier_constant(&mut self, name: &str) -> u8 {
    let s = self.vm.intern_string(name);
    self.make_constant(Value::Obj(s))
  }

  // --- variables --------------------------------------------------

  fn declare_variable(&mut self) {
    if self.current_scope().scope_depth == 0 {
      return;
    }
    let name = self.previous.lexeme.to_string();
    let depth = self.current_scope().scope_depth;
    let locals = &self.current_scope().locals;
    let mut duplicate = false;
    if !locals.is_empty() {
      let mut i = locals.len() - 1;
      loop {
        let local = &locals[i];
        if local.depth != -1 && local.depth < depth {
          break;
        }
        if local.name == name {
          duplicate = true;
          break;
        }
        if i == 0 {
          break;
        }
        i -= 1;
      }
    }
    if duplicate {
      self.error("Already a variable with this name in this scope.");
      return;
    }
    self.add_local(name);
  }

  fn add_local(&mut self, name: String) {
    if self.current_scope().locals.len() >= 256 {
      self.error("Too many local variables in function.");
      return;
    }
    self.current_scope_mut().locals.push(Local {
      name,
      depth: -1,
      is_captured: false,
    });
  }

  fn mark_initialized(&mut self) {
    if self.current_scope().scope_depth == 0 {
      return;
    }
    let depth = self.current_scope().scope_depth;
    let scope = self.current_scope_mut();
    let last = scope.locals.len() - 1;
    scope.locals[last].depth = depth;
  }

  fn parse_variable(&mut self, message: &str) -> u8 {
    self.consume(TokenKind::Ident, message);
    self.declare_variable();
    if self.current_scope().scope_depth > 0 {
      return 0;
    }
    let name = self.previous.lexeme.to_string();
    self.identifier_constant(&name)
  }

  fn define_variable(&mut self, global: u8) {
    if self.current_scope().scope_depth > 0 {
      self.mark_initialized();
      return;
    }
    self.emit_op_u8(OpCode::DefineGlobal, global);
  }

  fn resolve_local(&mut self, scope_index: usize, name: &str) -> Option<Option<u8>> {
    let scope = &self.vm.compiler_scopes[scope_index];
    for (i, local) in scope.locals.iter().enumerate().rev() {
      if local.name == name {
        if local.depth == -1 {
          self.error("Can't read local variable in its own initializer.");
          return Some(None);
        }
        return Some(Some(i as u8));
      }
    }
    None
  }

  fn add_upvalue(&mut self, scope_index: usize, index: u8, is_local: bool) -> u8 {
    let scope = &mut self.vm.compiler_scopes[scope_index];
    for (i, up) in scope.upvalues.iter().enumerate() {
      if up.index == index && up.is_local == is_local {
        return i as u8;
      }
    }
    if scope.upvalues.len() >= 256 {
      self.error("Too many closure variables in function.");
      return 0;
    }
    scope.upvalues.push(UpvalueDesc { index, is_local });
    (scope.upvalues.len() - 1) as u8
  }

  fn resolve_upvalue(&mut self, scope_index: usize, name: &str) -> Option<u8> {
    if scope_index == 0 {
      return None;
    }
    let enclosing = scope_index - 1;
    match self.resolve_local(enclosing, name) {
      Some(Some(local_idx)) => {
        self.vm.compiler_scopes[enclosing].locals[local_idx as usize].is_captured = true;
        Some(self.add_upvalue(scope_index, local_idx, true))
      }
      Some(None) => None,
      None => self
        .resolve_upvalue(enclosing, name)
        .map(|up_idx| self.add_upvalue(scope_index, up_idx, false)),
    }
  }

  fn named_variable(&mut self, name: &str, can_assign: bool) {
    let scope_index = self.vm.compiler_scopes.len() - 1;
    let (get_op, set_op, arg): (OpCode, OpCode, u8) =
      match self.resolve_local(scope_index, name) {
        Some(Some(slot)) => (OpCode::GetLocal, OpCode::SetLocal, slot),
        Some(None) => return,
        None => match self.resolve_upvalue(scope_index, name) {
          Some(slot) => (OpCode::GetUpvalue, OpCode::SetUpvalue, slot),
          None => {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
          }
        },
      };

    if can_assign && self.match_token(TokenKind::Equal) {
      self.expression();
      self.emit_op_u8(set_op, arg);
    } else {
      self.emit_op_u8(get_op, arg);
    }
  }

  // --- scopes -----------------------------------------------------

  fn begin_scope(&mut self) {
    self.current_scope_mut().scope_depth += 1;
  }

  fn end_scope(&mut self) {
    self.current_scope_mut().scope_depth -= 1;
    let depth = self.current_scope().scope_depth;
    while let Some(local) = self.current_scope().locals.last() {
      if local.depth <= depth {
        break;
      }
      let captured = local.is_captured;
      self.current_scope_mut().locals.pop();
      if captured {
        self.emit_op(OpCode::CloseUpvalue);
      } else {
        self.emit_op(OpCode::Pop);
      }
    }
  }

  // --- expressions --------------------------------------------------

  fn parse_precedence(&mut self, precedence: Precedence) {
    self.advance();
    let Some(prefix) = rule(self.previous.kind).prefix else {
      self.error("Expect expression.");
      return;
    };
    let can_assign = precedence <= Precedence::Assignment;
    prefix(self, can_assign);

    while precedence <= rule(self.current.kind).precedence {
      self.advance();
      if let Some(infix) = rule(self.previous.kind).infix {
        infix(self, can_assign);
      }
    }

    if can_assign && self.match_token(TokenKind::Equal) {
      self.error("Invalid assignment target.");
    }
  }

  fn expression(&mut self) {
    self.parse_precedence(Precedence::Assignment);
  }

  fn number(&mut self, _can_assign: bool) {
    let value: f64 = self.previous.lexeme.parse().unwrap_or(f64::NAN);
    self.emit_constant(Value::Number(value));
  }

  fn string(&mut self, _can_assign: bool) {
    let raw = self.previous.lexeme;
    let content = &raw[1..raw.len() - 1];
    let s = self.vm.intern_string(content);
    self.emit_constant(Value::Obj(s));
  }

  fn variable(&mut self, can_assign: bool) {
    let name = self.previous.lexeme.to_string();
    self.named_variable(&name, can_assign);
  }

  fn this(&mut self, _can_assign: bool) {
    if self.class_scopes.is_empty() {
      self.error("Can't use 'this' outside of a class.");
      return;
    }
    self.named_variable("this", false);
  }

  fn grouping(&mut self, _can_assign: bool) {
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after expression.");
  }

  fn unary(&mut self, _can_assign: bool) {
    let operator = self.previous.kind;
    self.parse_precedence(Precedence::Unary);
    match operator {
      TokenKind::Minus => self.emit_op(OpCode::Negate),
      TokenKind::Bang => self.emit_op(OpCode::Not),
      _ => unreachable!(),
    }
  }

  fn binary(&mut self, _can_assign: bool) {
    let operator = self.previous.kind;
    let r = rule(operator);
    self.parse_precedence(r.precedence.next());
    match operator {
      TokenKind::Plus => self.emit_op(OpCode::Add),
      TokenKind::Minus => self.emit_op(OpCode::Subtract),
      TokenKind::Star => self.emit_op(OpCode::Multiply),
      TokenKind::Slash => self.emit_op(OpCode::Divide),
      TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
      TokenKind::BangEqual => {
        self.emit_op(OpCode::Equal);
        self.emit_op(OpCode::Not);
      }
      TokenKind::Greater => self.emit_op(OpCode::Greater),
      TokenKind::GreaterEqual => {
        self.emit_op(OpCode::Less);
        self.emit_op(OpCode::Not);
      }
      TokenKind::Less => self.emit_op(OpCode::Less),
      TokenKind::LessEqual => {
        self.emit_op(OpCode::Greater);
        self.emit_op(OpCode::Not);
      }
      _ => unreachable!(),
    }
  }

  fn literal(&mut self, _can_assign: bool) {
    match self.previous.kind {
      TokenKind::False => self.emit_op(OpCode::False),
      TokenKind::Nil => self.emit_op(OpCode::Nil),
      TokenKind::True => self.emit_op(OpCode::True),
      _ => unreachable!(),
    }
  }

  fn and(&mut self, _can_assign: bool) {
    let end_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.parse_precedence(Precedence::And);
    self.patch_jump(end_jump);
  }

  fn or(&mut self, _can_assign: bool) {
    let else_jump = self.emit_jump(OpCode::JumpIfFalse);
    let end_jump = self.emit_jump(OpCode::Jump);
    self.patch_jump(else_jump);
    self.emit_op(OpCode::Pop);
    self.parse_precedence(Precedence::Or);
    self.patch_jump(end_jump);
  }

  fn argument_list(&mut self) -> u8 {
    let mut count: u16 = 0;
    if !self.check(TokenKind::RightParen) {
      loop {
        self.expression();
        if count == 255 {
          self.error("Can't have more than 255 arguments.");
        }
        count += 1;
        if !self.match_token(TokenKind::Comma) {
          break;
        }
      }
    }
    self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
    count as u8
  }

  fn call(&mut self, _can_assign: bool) {
    let argc = self.argument_list();
    self.emit_op_u8(OpCode::Call, argc);
  }

  fn dot(&mut self, can_assign: bool) {
    self.consume(TokenKind::Ident, "Expect property name after '.'.");
    let name = self.previous.lexeme.to_string();
    let name_const = self.identifier_constant(&name);
    if can_assign && self.match_token(TokenKind::Equal) {
      self.expression();
      self.emit_op_u8(OpCode::SetProperty, name_const);
    } else {
      self.emit_op_u8(OpCode::GetProperty, name_const);
    }
  }

  // --- statements ---------------------------------------------------

  fn declaration(&mut self) {
    if self.match_token(TokenKind::Class) {
      self.class_declaration();
    } else if self.match_token(TokenKind::Fun) {
      self.fun_declaration();
    } else if self.match_token(TokenKind::Var) {
      self.var_declaration();
    } else {
      self.statement();
    }
    if self.panic_mode {
      self.synchronize();
    }
  }

  fn statement(&mut self) {
    if self.match_token(TokenKind::Print) {
      self.print_statement();
    } else if self.match_token(TokenKind::If) {
      self.if_statement();
    } else if self.match_token(TokenKind::While) {
      self.while_statement();
    } else if self.match_token(TokenKind::For) {
      self.for_statement();
    } else if self.match_token(TokenKind::Return) {
      self.return_statement();
    } else if self.match_token(TokenKind::LeftBrace) {
      self.begin_scope();
      self.block();
      self.end_scope();
    } else {
      self.expression_statement();
    }
  }

  fn block(&mut self) {
    while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
      self.declaration();
    }
    self.consume(TokenKind::RightBrace, "Expect '}' after block.");
  }

  fn var_declaration(&mut self) {
    let global = self.parse_variable("Expect variable name.");
    if self.match_token(TokenKind::Equal) {
      self.expression();
    } else {
      self.emit_op(OpCode::Nil);
    }
    self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
    self.define_variable(global);
  }

  fn fun_declaration(&mut self) {
    let global = self.parse_variable("Expect function name.");
    self.mark_initialized();
    self.function(FunctionType::Function);
    self.define_variable(global);
  }

  fn function(&mut self, function_type: FunctionType) {
    let name = self.vm.intern_string(self.previous.lexeme);
    self.vm.compiler_scopes.push(FunctionScope::new(function_type, Some(name)));
    self.begin_scope();

    self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
    if !self.check(TokenKind::RightParen) {
      loop {
        let arity = self.current_scope().arity as u16 + 1;
        if arity > 255 {
          self.error_at_current("Can't have more than 255 parameters.");
        }
        self.current_scope_mut().arity = arity.min(255) as u8;
        let constant = self.parse_variable("Expect parameter name.");
        self.define_variable(constant);
        if !self.match_token(TokenKind::Comma) {
          break;
        }
      }
    }
    self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
    self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
    self.block();

    let (function, upvalues) = end_function(self.vm);
    let const_idx = self.make_constant(Value::Obj(function));
    self.emit_op_u8(OpCode::Closure, const_idx);
    for up in upvalues {
      self.emit_byte(up.is_local as u8);
      self.emit_byte(up.index);
    }
  }

  fn method(&mut self) {
    self.consume(TokenKind::Ident, "Expect method name.");
    let name = self.previous.lexeme.to_string();
    let name_const = self.identifier_constant(&name);
    let ftype = if name == "init" {
      FunctionType::Initializer
    } else {
      FunctionType::Method
    };
    self.function(ftype);
    self.emit_op_u8(OpCode::Method, name_const);
  }

  fn class_declaration(&mut self) {
    self.consume(TokenKind::Ident, "Expect class name.");
    let class_name = self.previous.lexeme.to_string();
    let name_const = self.identifier_constant(&class_name);
    self.declare_variable();

    self.emit_op_u8(OpCode::Class, name_const);
    self.define_variable(name_const);

    self.class_scopes.push(ClassScope);
    self.named_variable(&class_name, false);

    self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
    while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
      self.method();
    }
    self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
    self.emit_op(OpCode::Pop);

    self.class_scopes.pop();
  }

  fn print_statement(&mut self) {
    self.expression();
    self.consume(TokenKind::Semicolon, "Expect ';' after value.");
    self.emit_op(OpCode::Print);
  }

  fn return_statement(&mut self) {
    if self.current_scope().function_type == FunctionType::Script {
      self.error("Can't return from top-level code.");
    }
    if self.match_token(TokenKind::Semicolon) {
      self.emit_return_for_current();
    } else {
      if self.current_scope().function_type == FunctionType::Initializer {
        self.error("Can't return a value from an initializer.");
      }
      self.expression();
      self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
      self.emit_op(OpCode::Return);
    }
  }

  fn emit_return_for_current(&mut self) {
    if self.current_scope().function_type == FunctionType::Initializer {
      self.emit_op_u8(OpCode::GetLocal, 0);
    } else {
      self.emit_op(OpCode::Nil);
    }
    self.emit_op(OpCode::Return);
  }

  fn expression_statement(&mut self) {
    self.expression();
    self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
    self.emit_op(OpCode::Pop);
  }

  fn if_statement(&mut self) {
    self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after condition.");

    let then_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.statement();

    let else_jump = self.emit_jump(OpCode::Jump);
    self.patch_jump(then_jump);
    self.emit_op(OpCode::Pop);

    if self.match_token(TokenKind::Else) {
      self.statement();
    }
    self.patch_jump(else_jump);
  }

  fn while_statement(&mut self) {
    let loop_start = self.current_scope().chunk.code.len();
    self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after condition.");

    let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.statement();
    self.emit_loop(loop_start);

    self.patch_jump(exit_jump);
    self.emit_op(OpCode::Pop);
  }

  fn for_statement(&mut self) {
    self.begin_scope();
    self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
    if self.match_token(TokenKind::Semicolon) {
      // no initializer
    } else if self.match_token(TokenKind::Var) {
      self.var_declaration();
    } else {
      self.expression_statement();
    }

    let mut loop_start = self.current_scope().chunk.code.len();
    let mut exit_jump: Option<usize> = None;
    if !self.match_token(TokenKind::Semicolon) {
      self.expression();
      self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
      exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
      self.emit_op(OpCode::Pop);
    }

    if !self.match_token(TokenKind::RightParen) {
      let body_jump = self.emit_jump(OpCode::Jump);
      let increment_start = self.current_scope().chunk.code.len();
      self.expression();
      self.emit_op(OpCode::Pop);
      self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

      self.emit_loop(loop_start);
      loop_start = increment_start;
      self.patch_jump(body_jump);
    }

    self.statement();
    self.emit_loop(loop_start);

    if let Some(exit_jump) = exit_jump {
      self.patch_jump(exit_jump);
      self.emit_op(OpCode::Pop);
    }

    self.end_scope();
  }
}
