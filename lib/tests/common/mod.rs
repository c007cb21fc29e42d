//! Shared fixtures for the integration tests: loading and weaving textual modules, and a small
//! interpreter that runs woven bodies so that tests observe behaviour rather than instructions.

#![allow(dead_code)]

use nullguard::il::code::{BranchKind, HandlerKind, InstrId, MethodBody, Op};
use nullguard::il::text::load_module;
use nullguard::il::type_graph::{FieldData, MethodData, SystemLibrary, TypeData, TypeGraph};
use nullguard::il::{FullName, Module};
use nullguard::weave::{ModuleWeaver, Settings, WeaveReport};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Load a module and weave every method of it
pub fn weave_source<'g>(
    graph: &TypeGraph<'g>,
    system: &SystemLibrary<'g>,
    source: &str,
    settings: &Settings,
) -> (Module<'g>, WeaveReport) {
    let module = load_module(graph, system, source).expect("fixture should load");
    let mut weaver = ModuleWeaver::new(settings, system);
    weaver
        .process_module(&module)
        .expect("weaving should succeed");
    (module, weaver.into_report())
}

pub fn method<'g>(module: &Module<'g>, type_name: &str, method_name: &str) -> &'g MethodData<'g> {
    module
        .find_method(type_name, method_name)
        .unwrap_or_else(|| panic!("missing {}::{}", type_name, method_name))
}

/// Number of instructions in a method body matching a predicate
pub fn count_ops<'g>(method: &MethodData<'g>, predicate: impl Fn(&Op<'g>) -> bool) -> usize {
    let body = method.body.borrow();
    let body = body.as_ref().expect("method should have a body");
    body.instructions
        .iter()
        .filter(|insn| predicate(&insn.op))
        .count()
}

/// Number of exceptions of the given type constructed in a method body
pub fn count_constructed<'g>(method: &MethodData<'g>, exception: &TypeData<'g>) -> usize {
    count_ops(method, |op| {
        matches!(op, Op::NewObj(constructor) if constructor.declaring_type == exception)
    })
}

pub fn verify(method: &MethodData<'_>) -> usize {
    let body = method.body.borrow();
    let body = body.as_ref().expect("method should have a body");
    body.verify_stack(!method.return_type.is_void())
        .unwrap_or_else(|err| panic!("{:?} fails verification: {}", method, err))
}

pub type Slot<'g> = Rc<RefCell<Value<'g>>>;

#[derive(Clone)]
pub enum Value<'g> {
    Null,
    Int(i64),
    Str(Rc<str>),
    Obj(Rc<Object<'g>>),

    /// Managed pointer to an argument, local or field
    Ref(Slot<'g>),
}

impl<'g> Value<'g> {
    pub fn str(string: &str) -> Value<'g> {
        Value::Str(Rc::from(string))
    }

    pub fn slot(value: Value<'g>) -> Slot<'g> {
        Rc::new(RefCell::new(value))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(string) => Some(string),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn is_true(&self) -> bool {
        !matches!(self, Value::Null | Value::Int(0))
    }

    fn deref(&self) -> Value<'g> {
        match self {
            Value::Ref(slot) => slot.borrow().clone(),
            other => panic!("expected a managed pointer, found {:?}", other),
        }
    }

    fn object(&self) -> Rc<Object<'g>> {
        match self {
            Value::Obj(object) => object.clone(),
            Value::Ref(slot) => slot.borrow().object(),
            other => panic!("expected an object, found {:?}", other),
        }
    }
}

impl<'g> PartialEq for Value<'g> {
    fn eq(&self, other: &Value<'g>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(i1), Value::Int(i2)) => i1 == i2,
            (Value::Str(s1), Value::Str(s2)) => s1 == s2,
            (Value::Obj(o1), Value::Obj(o2)) => Rc::ptr_eq(o1, o2),
            (Value::Ref(r1), Value::Ref(r2)) => Rc::ptr_eq(r1, r2),
            _ => false,
        }
    }
}

impl<'g> fmt::Debug for Value<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(int) => write!(f, "{}", int),
            Value::Str(string) => write!(f, "{:?}", string),
            Value::Obj(object) => write!(f, "<{:?}>", object.ty),
            Value::Ref(slot) => write!(f, "&{:?}", slot.borrow()),
        }
    }
}

pub struct Object<'g> {
    pub ty: &'g TypeData<'g>,
    fields: RefCell<HashMap<String, Slot<'g>>>,
}

impl<'g> Object<'g> {
    fn field(&self, name: &str) -> Slot<'g> {
        self.fields
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert_with(|| Value::slot(Value::Null))
            .clone()
    }

    pub fn get(&self, name: &str) -> Value<'g> {
        self.field(name).borrow().clone()
    }
}

/// Exception that escaped a call
#[derive(Clone, PartialEq, Debug)]
pub struct Thrown {
    pub type_name: String,
    pub message: Option<String>,
    pub param_name: Option<String>,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Outcome<'g> {
    Returned(Value<'g>),
    Threw(Thrown),
}

impl<'g> Outcome<'g> {
    pub fn returned(self) -> Value<'g> {
        match self {
            Outcome::Returned(value) => value,
            Outcome::Threw(thrown) => panic!("expected a return, got {:?}", thrown),
        }
    }

    pub fn thrown(self) -> Thrown {
        match self {
            Outcome::Threw(thrown) => thrown,
            Outcome::Returned(value) => panic!("expected an exception, got {:?}", value),
        }
    }
}

/// Result reported to an async method builder
#[derive(Clone, PartialEq, Debug)]
pub enum Completion<'g> {
    Result(Value<'g>),
    Exception(Thrown),
}

const STEP_LIMIT: usize = 100_000;

enum Flow<'g> {
    Next,
    Jump(InstrId),
    Return,
    Throw(Value<'g>),
}

/// Runs method bodies
///
/// System methods have no bodies: the handful the fixtures and the weaver use are built in.
/// `finally` handlers are not run.
#[derive(Default)]
pub struct Interpreter<'g> {
    /// Every `Debug.Assert` call, as `(condition, message)`
    pub asserts: Vec<(bool, String)>,

    /// Every `SetResult` and `SetException` call on a method builder
    pub completions: Vec<Completion<'g>>,

    statics: HashMap<String, Slot<'g>>,
    steps: usize,
}

impl<'g> Interpreter<'g> {
    pub fn new() -> Interpreter<'g> {
        Interpreter::default()
    }

    /// Fresh instance of a type, without running any constructor
    pub fn instantiate(&self, ty: &'g TypeData<'g>) -> Value<'g> {
        Value::Obj(Rc::new(Object {
            ty,
            fields: RefCell::new(HashMap::new()),
        }))
    }

    /// Call a method (the receiver, if any, is the first argument)
    pub fn invoke(&mut self, method: &'g MethodData<'g>, arguments: Vec<Value<'g>>) -> Outcome<'g> {
        match self.run(method, arguments) {
            Ok(value) => Outcome::Returned(value),
            Err(exception) => Outcome::Threw(thrown(&exception)),
        }
    }

    fn run(
        &mut self,
        method: &'g MethodData<'g>,
        arguments: Vec<Value<'g>>,
    ) -> Result<Value<'g>, Value<'g>> {
        let body_ref = method.body.borrow();
        let body: &MethodBody<'g> = body_ref
            .as_ref()
            .unwrap_or_else(|| panic!("{:?} has no body", method));
        let arguments: Vec<Slot<'g>> = arguments.into_iter().map(Value::slot).collect();
        let locals: Vec<Slot<'g>> = body
            .variables
            .iter()
            .map(|variable| {
                let initial = if variable.ty.is_value_type() {
                    Value::Int(0)
                } else {
                    Value::Null
                };
                Value::slot(initial)
            })
            .collect();
        let position = |id: InstrId| {
            body.index_of(id)
                .unwrap_or_else(|| panic!("{:?} is not in the body", id))
        };

        let mut stack: Vec<Value<'g>> = vec![];
        let mut pc = 0;
        loop {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded in {:?}", method);
            let at = pc;
            let op = &body.instructions[pc].op;
            pc += 1;

            let flow = match op {
                Op::Nop | Op::Box(_) => Flow::Next,
                Op::LdNull => push(&mut stack, Value::Null),
                Op::LdStr(string) => push(&mut stack, Value::str(string)),
                Op::LdcI4(int) => push(&mut stack, Value::Int(i64::from(*int))),
                Op::LdArg(slot) => {
                    let value = arguments[*slot as usize].borrow().clone();
                    push(&mut stack, value)
                }
                Op::LdArgA(slot) => push(&mut stack, Value::Ref(arguments[*slot as usize].clone())),
                Op::StArg(slot) => {
                    *arguments[*slot as usize].borrow_mut() = pop(&mut stack);
                    Flow::Next
                }
                Op::LdLoc(slot) => {
                    let value = locals[*slot as usize].borrow().clone();
                    push(&mut stack, value)
                }
                Op::LdLocA(slot) => push(&mut stack, Value::Ref(locals[*slot as usize].clone())),
                Op::StLoc(slot) => {
                    *locals[*slot as usize].borrow_mut() = pop(&mut stack);
                    Flow::Next
                }
                Op::Dup => {
                    let top = stack.last().cloned().expect("stack underflow");
                    push(&mut stack, top)
                }
                Op::Pop => {
                    pop(&mut stack);
                    Flow::Next
                }
                Op::Ceq => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    let equal = match (&left, &right) {
                        (Value::Null, Value::Int(0)) | (Value::Int(0), Value::Null) => true,
                        _ => left == right,
                    };
                    push(&mut stack, Value::Int(equal as i64))
                }
                Op::Add | Op::Sub => {
                    let right = int(pop(&mut stack));
                    let left = int(pop(&mut stack));
                    let result = if *op == Op::Add {
                        left + right
                    } else {
                        left - right
                    };
                    push(&mut stack, Value::Int(result))
                }
                Op::LdIndRef | Op::LdObj(_) => {
                    let pointer = pop(&mut stack);
                    push(&mut stack, pointer.deref())
                }
                Op::StIndRef => {
                    let value = pop(&mut stack);
                    match pop(&mut stack) {
                        Value::Ref(slot) => *slot.borrow_mut() = value,
                        other => panic!("expected a managed pointer, found {:?}", other),
                    }
                    Flow::Next
                }
                Op::LdFld(field) => {
                    let slot = self.field_slot(field, &mut stack);
                    let value = slot.borrow().clone();
                    push(&mut stack, value)
                }
                Op::LdFldA(field) => {
                    let slot = self.field_slot(field, &mut stack);
                    push(&mut stack, Value::Ref(slot))
                }
                Op::StFld(field) => {
                    let value = pop(&mut stack);
                    let slot = self.field_slot(field, &mut stack);
                    *slot.borrow_mut() = value;
                    Flow::Next
                }
                Op::Call(callee) | Op::CallVirt(callee) => {
                    let count = callee.parameters.len() + callee.has_this() as usize;
                    let arguments = stack.split_off(stack.len() - count);
                    let is_virtual = matches!(op, Op::CallVirt(_));
                    match self.call(callee, arguments, is_virtual) {
                        Ok(value) => {
                            if !callee.return_type.is_void() {
                                stack.push(value);
                            }
                            Flow::Next
                        }
                        Err(exception) => Flow::Throw(exception),
                    }
                }
                Op::NewObj(constructor) => {
                    let count = constructor.parameters.len();
                    let arguments = stack.split_off(stack.len() - count);
                    match self.construct(constructor, arguments) {
                        Ok(object) => push(&mut stack, object),
                        Err(exception) => Flow::Throw(exception),
                    }
                }
                Op::Branch(kind, _, target) => match kind {
                    BranchKind::Always => Flow::Jump(*target),
                    BranchKind::Leave => {
                        stack.clear();
                        Flow::Jump(*target)
                    }
                    BranchKind::True => {
                        if pop(&mut stack).is_true() {
                            Flow::Jump(*target)
                        } else {
                            Flow::Next
                        }
                    }
                    BranchKind::False => {
                        if pop(&mut stack).is_true() {
                            Flow::Next
                        } else {
                            Flow::Jump(*target)
                        }
                    }
                },
                Op::Switch(targets) => {
                    let selector = int(pop(&mut stack));
                    match usize::try_from(selector).ok().and_then(|idx| targets.get(idx)) {
                        Some(target) => Flow::Jump(*target),
                        None => Flow::Next,
                    }
                }
                Op::Ret => Flow::Return,
                Op::Throw => Flow::Throw(pop(&mut stack)),
                Op::EndFinally => panic!("finally handlers are not supported"),
            };

            match flow {
                Flow::Next => (),
                Flow::Jump(target) => pc = position(target),
                Flow::Return => {
                    return Ok(if method.return_type.is_void() {
                        Value::Null
                    } else {
                        pop(&mut stack)
                    })
                }
                Flow::Throw(exception) => {
                    let exception_type = exception.object().ty;
                    let handler = body.exception_handlers.iter().find(|handler| {
                        position(handler.try_start) <= at
                            && at < position(handler.try_end)
                            && matches!(handler.kind, HandlerKind::Catch(caught) if exception_type.is_subtype_of(caught))
                    });
                    match handler {
                        Some(handler) => {
                            stack.clear();
                            stack.push(exception);
                            pc = position(handler.handler_start);
                        }
                        None => return Err(exception),
                    }
                }
            }
        }
    }

    fn field_slot(&mut self, field: &'g FieldData<'g>, stack: &mut Vec<Value<'g>>) -> Slot<'g> {
        if field.is_static() {
            let key = format!("{:?}::{}", field.declaring_type, field.name);
            self.statics
                .entry(key)
                .or_insert_with(|| Value::slot(Value::Null))
                .clone()
        } else {
            pop(stack).object().field(&field.name)
        }
    }

    fn call(
        &mut self,
        callee: &'g MethodData<'g>,
        arguments: Vec<Value<'g>>,
        is_virtual: bool,
    ) -> Result<Value<'g>, Value<'g>> {
        if callee.declaring_type.namespace.starts_with("System") {
            return Ok(self.call_system(callee, arguments));
        }

        let mut target = callee;
        if is_virtual {
            let mut next_type = Some(arguments[0].object().ty);
            while let Some(ty) = next_type {
                let found = ty
                    .methods
                    .iter()
                    .find(|method| method.has_body() && method.has_same_signature(callee));
                if let Some(found) = found {
                    target = found;
                    break;
                }
                next_type = ty.base_type.get();
            }
        }
        self.run(target, arguments)
    }

    fn call_system(&mut self, callee: &'g MethodData<'g>, arguments: Vec<Value<'g>>) -> Value<'g> {
        let owner = callee.declaring_type.full_name();
        match (owner.as_str(), callee.name.as_str()) {
            ("System.Object", ".ctor") => (),
            ("System.Diagnostics.Debug", "Assert") => {
                let message = arguments[1].as_str().unwrap_or_default().to_owned();
                self.asserts.push((arguments[0].is_true(), message));
            }
            (builder, "SetResult") if builder.contains("MethodBuilder") => {
                let result = arguments.get(1).cloned().unwrap_or(Value::Null);
                self.completions.push(Completion::Result(result));
            }
            (builder, "SetException") if builder.contains("MethodBuilder") => {
                self.completions
                    .push(Completion::Exception(thrown(&arguments[1])));
            }
            _ => panic!("{:?} is not built in", callee),
        }
        Value::Null
    }

    fn construct(
        &mut self,
        constructor: &'g MethodData<'g>,
        arguments: Vec<Value<'g>>,
    ) -> Result<Value<'g>, Value<'g>> {
        let object = self.instantiate(constructor.declaring_type);
        if constructor.declaring_type.namespace.starts_with("System") {
            // Exceptions keep their constructor arguments as fields
            let instance = object.object();
            for (parameter, argument) in constructor.parameters.iter().zip(arguments) {
                *instance.field(&parameter.name).borrow_mut() = argument;
            }
        } else {
            let mut with_receiver = vec![object.clone()];
            with_receiver.extend(arguments);
            self.run(constructor, with_receiver)?;
        }
        Ok(object)
    }
}

fn push<'g>(stack: &mut Vec<Value<'g>>, value: Value<'g>) -> Flow<'g> {
    stack.push(value);
    Flow::Next
}

fn pop<'g>(stack: &mut Vec<Value<'g>>) -> Value<'g> {
    stack.pop().expect("stack underflow")
}

fn int(value: Value<'_>) -> i64 {
    match value {
        Value::Int(int) => int,
        Value::Null => 0,
        other => panic!("expected an integer, found {:?}", other),
    }
}

fn thrown(exception: &Value<'_>) -> Thrown {
    let object = exception.object();
    Thrown {
        type_name: object.ty.full_name(),
        message: object.get("message").as_str().map(str::to_owned),
        param_name: object.get("paramName").as_str().map(str::to_owned),
    }
}
