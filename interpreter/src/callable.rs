use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use crate::ast::FunctionDecl;
use crate::env::Environment;
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::value::Value;

pub(crate) trait Callable {
    fn name(&self) -> &str;
    fn arity(&self) -> usize;
    fn execute(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        args: &[Value],
    ) -> Result<Value, Error>;

    /// The canonical print form of this callable.
    fn display(&self) -> String {
        format!("<fn {}>", self.name())
    }

    // This is a bit hacky, but it lets the evaluator recover the concrete
    // class out of an evaluated superclass expression.
    fn as_class(self: Rc<Self>) -> Option<Rc<Class>>;
}

impl Debug for dyn Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

pub(crate) type BoxedFunction = Box<dyn Fn(&[Value]) -> Result<Value, Error>>;

// `Native` bridges plain rust functions into the interpreter's global
// namespace.
pub(crate) struct Native {
    func: BoxedFunction,
    name: String,
    arity: usize,
}

impl Native {
    pub(crate) fn new(func: BoxedFunction, name: String, arity: usize) -> Self {
        Self { func, name, arity }
    }
}

impl Callable for Native {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn execute(self: Rc<Self>, _: &mut Interpreter, args: &[Value]) -> Result<Value, Error> {
        (self.func)(args)
    }

    fn display(&self) -> String {
        format!("<native fn: {}>", self.name)
    }

    fn as_class(self: Rc<Self>) -> Option<Rc<Class>> {
        None
    }
}

/// A user function. The declaration is shared with the AST through an `Rc`,
/// so binding a method to an instance only costs two ref-count bumps. The
/// closure is fixed at declaration time and never reassigned afterwards.
#[derive(Debug)]
pub(crate) struct Function {
    declaration: Rc<FunctionDecl>,
    closure: Rc<RefCell<Environment>>,
    is_initializer: bool,
}

impl Function {
    pub(crate) fn new(
        declaration: Rc<FunctionDecl>,
        closure: Rc<RefCell<Environment>>,
        is_initializer: bool,
    ) -> Self {
        Function {
            declaration,
            closure,
            is_initializer,
        }
    }

    /// Returns a copy of this function whose closure is a fresh one-slot
    /// child environment binding `this` to the given instance.
    pub(crate) fn bind(&self, instance: Rc<RefCell<Instance>>) -> Function {
        let closure = Rc::new(RefCell::new(Environment::with(Rc::clone(&self.closure))));
        closure
            .borrow_mut()
            .define("this", Value::Instance(instance));

        Function {
            declaration: Rc::clone(&self.declaration),
            closure,
            is_initializer: self.is_initializer,
        }
    }

    fn bound_instance(&self) -> Value {
        // Initializers are only ever invoked bound, so `this` sits in the
        // closure's own slot.
        self.closure.borrow().get_at(0, "this").unwrap()
    }
}

impl Callable for Function {
    fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn execute(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        args: &[Value],
    ) -> Result<Value, Error> {
        let mut env = Environment::with(Rc::clone(&self.closure));
        for (param, arg) in self.declaration.params.iter().zip(args) {
            env.define(&param.lexeme, arg.clone());
        }

        let result =
            interpreter.execute_block_with_env(&self.declaration.body, Rc::new(RefCell::new(env)));

        match result {
            Ok(()) if self.is_initializer => Ok(self.bound_instance()),
            Ok(()) => Ok(Value::Nil),
            Err(Error::Return(_)) if self.is_initializer => Ok(self.bound_instance()),
            Err(Error::Return(ret)) => Ok(ret.value),
            Err(err) => Err(err),
        }
    }

    fn as_class(self: Rc<Self>) -> Option<Rc<Class>> {
        None
    }
}

#[derive(Debug)]
pub(crate) struct Class {
    name: String,
    superclass: Option<Rc<Class>>,
    methods: HashMap<String, Rc<Function>>,
}

impl Class {
    pub(crate) fn new(
        name: &str,
        superclass: Option<Rc<Class>>,
        methods: HashMap<String, Rc<Function>>,
    ) -> Rc<Self> {
        Rc::new(Class {
            name: name.to_string(),
            superclass,
            methods,
        })
    }

    /// Method lookup walks the superclass chain, nearest class first.
    pub(crate) fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        if let Some(fun) = self.methods.get(name) {
            Some(Rc::clone(fun))
        } else if let Some(superclass) = &self.superclass {
            superclass.find_method(name)
        } else {
            None
        }
    }
}

impl Callable for Class {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> usize {
        match self.find_method("init") {
            Some(init) => init.arity(),
            None => 0,
        }
    }

    /// Calling a class allocates an instance, runs `init` bound to it if
    /// one exists anywhere on the chain, and returns the instance. The
    /// initializer's own return value is discarded.
    fn execute(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        args: &[Value],
    ) -> Result<Value, Error> {
        let instance = Instance::new(Rc::clone(&self));
        if let Some(init) = self.find_method("init") {
            Rc::new(init.bind(Rc::clone(&instance))).execute(interpreter, args)?;
        }

        Ok(Value::Instance(instance))
    }

    fn display(&self) -> String {
        self.name.clone()
    }

    fn as_class(self: Rc<Self>) -> Option<Rc<Class>> {
        Some(self)
    }
}

#[derive(Debug)]
pub(crate) struct Instance {
    class: Rc<Class>,
    fields: HashMap<String, Value>,
}

impl Instance {
    pub(crate) fn new(class: Rc<Class>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Instance {
            class,
            fields: HashMap::new(),
        }))
    }

    /// Property access prefers fields over methods; a method hit is bound
    /// to this instance before being handed out.
    pub(crate) fn get(instance: &Rc<RefCell<Self>>, name: &str) -> Option<Value> {
        if let Some(field) = instance.borrow().fields.get(name) {
            Some(field.clone())
        } else {
            instance
                .borrow()
                .class
                .find_method(name)
                .map(|method| Value::Callable(Rc::new(method.bind(Rc::clone(instance)))))
        }
    }

    pub(crate) fn set(&mut self, name: &str, value: Value) -> Value {
        self.fields.insert(String::from(name), value.clone());
        value
    }
}

impl Display for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<instance of {}>", self.class.name())
    }
}
