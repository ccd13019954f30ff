use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use finch_core::{Literal, Token, TokenIndex, Type};
use log::{debug, trace};

use crate::ast::{Expr, ExprVisitor, FunctionDecl, Stmt, StmtVisitor};
use crate::ast_printer::AstPrinter;
use crate::callable::{BoxedFunction, Callable, Class, Function, Instance, Native};
use crate::env::Environment;
use crate::error::Error;
use crate::resolver::ResolvedStmts;
use crate::value::Value;

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    env: Rc<RefCell<Environment>>,

    // The resolver side-table. Keyed by token identity; a hit means the
    // binding lives exactly that many environment hops up from the current
    // frame, a miss means the name is a global.
    locals: HashMap<TokenIndex, usize>,
    stdout: Rc<RefCell<dyn Write>>,
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn Write>>) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));

        let clock: BoxedFunction = Box::new(|_| {
            let seconds = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs_f64())
                .unwrap_or(0.0);
            Ok(Value::Num(seconds))
        });
        let clock = Native::new(clock, String::from("clock"), 0);
        RefCell::borrow_mut(&globals).define("clock", Value::Callable(Rc::new(clock)));

        Interpreter {
            env: globals.clone(),
            globals,
            locals: HashMap::new(),
            stdout,
        }
    }

    /// Executes a resolved program, stopping at the first runtime error.
    pub fn interpret(&mut self, resolved: &ResolvedStmts) -> Result<(), Error> {
        for stmt in &resolved.0 {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    pub(crate) fn execute_block_with_env(
        &mut self,
        stmts: &[Stmt],
        env: Rc<RefCell<Environment>>,
    ) -> Result<(), Error> {
        let current = self.env.clone();
        self.env = env;
        for stmt in stmts {
            if let err @ Err(_) = self.visit_stmt(stmt) {
                self.env = current;
                return err;
            }
        }
        self.env = current;
        Ok(())
    }

    pub(crate) fn resolve(&mut self, token: &Token, depth: usize) {
        debug!("resolved '{}' at depth {}", token.lexeme, depth);
        self.locals.insert(token.idx, depth);
    }

    fn lookup_variable(&self, token: &Token) -> Option<Value> {
        match self.locals.get(&token.idx) {
            None => self.globals.borrow().get(&token.lexeme),
            Some(dist) => RefCell::borrow(&self.env).get_at(*dist, &token.lexeme),
        }
    }

    fn check_numbers(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64), Error> {
        match (left.as_number(), right.as_number()) {
            (Some(left), Some(right)) => Ok((left, right)),
            _ => Err(Error::runtime_error(operator, "Operands must be numbers.")),
        }
    }
}

impl ExprVisitor for Interpreter {
    type Item = Value;

    fn visit_assign(&mut self, name: &Token, value: &Expr) -> Result<Value, Error> {
        let value = self.visit_expr(value)?;

        match self.locals.get(&name.idx) {
            Some(dist) => {
                // The resolver guarantees a slot at this depth.
                RefCell::borrow_mut(&self.env)
                    .assign_at(*dist, &name.lexeme, value.clone())
                    .unwrap();
            }
            None => {
                if RefCell::borrow_mut(&self.globals)
                    .assign(&name.lexeme, value.clone())
                    .is_err()
                {
                    return Err(Error::runtime_error(
                        name,
                        &format!("Undefined variable '{}'.", name.lexeme),
                    ));
                }
            }
        }

        Ok(value)
    }

    fn visit_binary(
        &mut self,
        left: &Expr,
        operator: &Token,
        right: &Expr,
    ) -> Result<Value, Error> {
        let left = self.visit_expr(left)?;
        let right = self.visit_expr(right)?;

        match operator.ty {
            // Integer pairs stay integers for + - *; checked arithmetic
            // promotes to a double on overflow. Mixed pairs compute as
            // doubles.
            Type::Plus => match (left, right) {
                (Value::Str(left), Value::Str(right)) => {
                    Ok(Value::from(String::from(left.as_str()) + &right))
                }
                (Value::Int(left), Value::Int(right)) => Ok(left
                    .checked_add(right)
                    .map(Value::Int)
                    .unwrap_or(Value::Num(left as f64 + right as f64))),
                (left, right) => match (left.as_number(), right.as_number()) {
                    (Some(left), Some(right)) => Ok(Value::Num(left + right)),
                    _ => Err(Error::runtime_error(
                        operator,
                        "Operands must be two numbers or two strings.",
                    )),
                },
            },
            Type::Minus => match (left, right) {
                (Value::Int(left), Value::Int(right)) => Ok(left
                    .checked_sub(right)
                    .map(Value::Int)
                    .unwrap_or(Value::Num(left as f64 - right as f64))),
                (left, right) => {
                    let (left, right) = Self::check_numbers(operator, &left, &right)?;
                    Ok(Value::Num(left - right))
                }
            },
            Type::Star => match (left, right) {
                (Value::Int(left), Value::Int(right)) => Ok(left
                    .checked_mul(right)
                    .map(Value::Int)
                    .unwrap_or(Value::Num(left as f64 * right as f64))),
                (left, right) => {
                    let (left, right) = Self::check_numbers(operator, &left, &right)?;
                    Ok(Value::Num(left * right))
                }
            },
            // Division always computes in the double domain
            Type::Slash => {
                let (left, right) = Self::check_numbers(operator, &left, &right)?;
                if right == 0.0 {
                    Err(Error::runtime_error(operator, "Division by zero."))
                } else {
                    Ok(Value::Num(left / right))
                }
            }
            Type::Greater => {
                let (left, right) = Self::check_numbers(operator, &left, &right)?;
                Ok(Value::Bool(left > right))
            }
            Type::GreaterEqual => {
                let (left, right) = Self::check_numbers(operator, &left, &right)?;
                Ok(Value::Bool(left >= right))
            }
            Type::Less => {
                let (left, right) = Self::check_numbers(operator, &left, &right)?;
                Ok(Value::Bool(left < right))
            }
            Type::LessEqual => {
                let (left, right) = Self::check_numbers(operator, &left, &right)?;
                Ok(Value::Bool(left <= right))
            }
            Type::EqualEqual => Ok(Value::Bool(left == right)),
            Type::BangEqual => Ok(Value::Bool(left != right)),
            _ => Err(Error::runtime_error(operator, "Invalid operator.")),
        }
    }

    fn visit_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        args: &[Expr],
    ) -> Result<Value, Error> {
        let callee = self.visit_expr(callee)?;
        let mut evaluated_args = Vec::new();
        for arg in args {
            evaluated_args.push(self.visit_expr(arg)?);
        }

        match callee {
            Value::Callable(func) => {
                if func.arity() == evaluated_args.len() {
                    func.execute(self, &evaluated_args)
                } else {
                    Err(Error::runtime_error(
                        paren,
                        &format!(
                            "Expected {} arguments but got {}.",
                            func.arity(),
                            evaluated_args.len()
                        ),
                    ))
                }
            }
            _ => Err(Error::runtime_error(
                paren,
                "Can only call functions and classes.",
            )),
        }
    }

    fn visit_get(&mut self, object: &Expr, name: &Token) -> Result<Self::Item, Error> {
        if let Value::Instance(instance) = self.visit_expr(object)? {
            match Instance::get(&instance, &name.lexeme) {
                Some(val) => Ok(val),
                None => Err(Error::runtime_error(
                    name,
                    &format!("Undefined property '{}'.", name.lexeme),
                )),
            }
        } else {
            Err(Error::runtime_error(
                name,
                "Only instances have properties.",
            ))
        }
    }

    fn visit_set(
        &mut self,
        object: &Expr,
        name: &Token,
        value: &Expr,
    ) -> Result<Self::Item, Error> {
        match self.visit_expr(object)? {
            Value::Instance(instance) => {
                let value = self.visit_expr(value)?;
                Ok(RefCell::borrow_mut(&instance).set(&name.lexeme, value))
            }
            _ => Err(Error::runtime_error(name, "Only instances have fields.")),
        }
    }

    fn visit_this(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        match self.lookup_variable(keyword) {
            Some(value) => Ok(value),
            None => Err(Error::runtime_error(
                keyword,
                "Can't use 'this' outside of a class.",
            )),
        }
    }

    fn visit_super(&mut self, keyword: &Token, method: &Token) -> Result<Self::Item, Error> {
        let dist = match self.locals.get(&keyword.idx) {
            Some(dist) => *dist,
            None => {
                return Err(Error::runtime_error(
                    keyword,
                    "Can't use 'super' outside of a class.",
                ))
            }
        };

        let superclass = RefCell::borrow(&self.env)
            .get_at(dist, "super")
            .and_then(|value| match value {
                Value::Callable(callable) => callable.as_class(),
                _ => None,
            });
        let superclass = match superclass {
            Some(class) => class,
            None => {
                return Err(Error::runtime_error(
                    keyword,
                    "Can't use 'super' in a class with no superclass.",
                ))
            }
        };

        // `this` always sits one environment nearer than `super`
        let object = match RefCell::borrow(&self.env).get_at(dist - 1, "this") {
            Some(Value::Instance(instance)) => instance,
            _ => {
                return Err(Error::runtime_error(
                    keyword,
                    "Can't use 'super' outside of a class.",
                ))
            }
        };

        match superclass.find_method(&method.lexeme) {
            Some(function) => Ok(Value::Callable(Rc::new(function.bind(object)))),
            None => Err(Error::runtime_error(
                method,
                &format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }

    fn visit_grouping(&mut self, expression: &Expr) -> Result<Self::Item, Error> {
        self.visit_expr(expression)
    }

    fn visit_literal(&mut self, value: &Literal) -> Result<Self::Item, Error> {
        Ok(Value::from(value.clone()))
    }

    fn visit_logical(
        &mut self,
        left: &Expr,
        operator: &Token,
        right: &Expr,
    ) -> Result<Value, Error> {
        let left = self.visit_expr(left)?;

        // Short-circuit: the result is the deciding operand itself, not a
        // coerced boolean.
        if operator.ty == Type::Or {
            if left.is_truthy() {
                return Ok(left);
            }
        } else if !left.is_truthy() {
            return Ok(left);
        }

        self.visit_expr(right)
    }

    fn visit_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value, Error> {
        let right = self.visit_expr(right)?;
        match (operator.ty, right) {
            (Type::Minus, Value::Int(val)) => Ok(val
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Num(-(val as f64)))),
            (Type::Minus, Value::Num(val)) => Ok(Value::Num(-val)),
            (Type::Minus, _) => Err(Error::runtime_error(operator, "Operand must be a number.")),
            (Type::Bang, val) => Ok(Value::Bool(!val.is_truthy())),
            _ => Err(Error::runtime_error(operator, "Invalid operator.")),
        }
    }

    fn visit_variable(&mut self, name: &Token) -> Result<Value, Error> {
        match self.lookup_variable(name) {
            None => Err(Error::runtime_error(
                name,
                &format!("Undefined variable '{}'.", name.lexeme),
            )),
            Some(value) => Ok(value),
        }
    }
}

impl StmtVisitor for Interpreter {
    type Item = ();

    fn visit_block(&mut self, statements: &[Stmt]) -> Result<(), Error> {
        let env = Rc::new(RefCell::new(Environment::with(self.env.clone())));
        self.execute_block_with_env(statements, env)
    }

    fn visit_expression(&mut self, expression: &Expr) -> Result<Self::Item, Error> {
        trace!("eval {}", AstPrinter::print(expression));
        self.visit_expr(expression)?;
        Ok(())
    }

    fn visit_function(&mut self, decl: &Rc<FunctionDecl>) -> Result<Self::Item, Error> {
        let function = Function::new(Rc::clone(decl), self.env.clone(), false);
        RefCell::borrow_mut(&self.env)
            .define(&decl.name.lexeme, Value::Callable(Rc::new(function)));
        Ok(())
    }

    fn visit_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<Self::Item, Error> {
        let superclass = match superclass {
            Some(expr) => {
                let class = match self.visit_expr(expr)? {
                    Value::Callable(callable) => callable.as_class(),
                    _ => None,
                };

                match class {
                    Some(class) => Some(class),
                    None => {
                        let token = match expr {
                            Expr::Variable { name } => name,
                            _ => name,
                        };
                        return Err(Error::runtime_error(token, "Superclass must be a class."));
                    }
                }
            }
            None => None,
        };

        // The name is defined before the methods are built so that method
        // bodies can refer to the class itself.
        RefCell::borrow_mut(&self.env).define(&name.lexeme, Value::Nil);

        // Methods close over an extra environment holding `super` when the
        // class has a superclass.
        let method_env = match &superclass {
            Some(class) => {
                let env = Rc::new(RefCell::new(Environment::with(self.env.clone())));
                let callable: Rc<dyn Callable> = Rc::clone(class) as Rc<dyn Callable>;
                RefCell::borrow_mut(&env).define("super", Value::Callable(callable));
                env
            }
            None => self.env.clone(),
        };

        let mut method_map = HashMap::new();
        for decl in methods {
            let is_initializer = decl.name.lexeme == "init";
            method_map.insert(
                decl.name.lexeme.clone(),
                Rc::new(Function::new(
                    Rc::clone(decl),
                    method_env.clone(),
                    is_initializer,
                )),
            );
        }

        let class = Class::new(&name.lexeme, superclass, method_map);
        if RefCell::borrow_mut(&self.env)
            .assign(&name.lexeme, Value::Callable(class))
            .is_err()
        {
            Err(Error::runtime_error(name, "Undefined variable."))
        } else {
            Ok(())
        }
    }

    fn visit_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), Error> {
        if self.visit_expr(condition)?.is_truthy() {
            self.visit_stmt(then_branch)
        } else if let Some(else_branch) = else_branch {
            self.visit_stmt(else_branch)
        } else {
            Ok(())
        }
    }

    fn visit_while(
        &mut self,
        condition: &Expr,
        body: &Stmt,
        increment: Option<&Expr>,
        _token: &Token,
    ) -> Result<(), Error> {
        loop {
            if !self.visit_expr(condition)?.is_truthy() {
                break;
            }

            match self.visit_stmt(body) {
                Ok(()) => {}
                Err(Error::Break(_)) => break,
                // `continue` skips the rest of the body but still runs the
                // for-loop step below
                Err(Error::Continue(_)) => {}
                Err(err) => return Err(err),
            }

            if let Some(increment) = increment {
                self.visit_expr(increment)?;
            }
        }

        Ok(())
    }

    fn visit_print(&mut self, expression: &Expr) -> Result<(), Error> {
        let value = self.visit_expr(expression)?;
        writeln!(RefCell::borrow_mut(&self.stdout), "{}", value).unwrap();
        Ok(())
    }

    fn visit_return(&mut self, _keyword: &Token, value: Option<&Expr>) -> Result<Self::Item, Error> {
        let value = match value {
            Some(expr) => self.visit_expr(expr)?,
            None => Value::Nil,
        };
        Err(Error::return_value(value))
    }

    fn visit_break(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        Err(Error::Break(keyword.clone()))
    }

    fn visit_continue(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        Err(Error::Continue(keyword.clone()))
    }

    fn visit_var(&mut self, name: &Token, init: Option<&Expr>) -> Result<(), Error> {
        let value = match init {
            Some(expr) => self.visit_expr(expr)?,
            None => Value::Nil,
        };
        RefCell::borrow_mut(&self.env).define(&name.lexeme, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::str;

    use finch_core::{Scanner, Token};

    use crate::error::Error;
    use crate::interpreter::Interpreter;
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn test_statements(src: &str, out: Option<&str>, err: Option<&str>) {
        println!("Testing source:\n{}", src);

        let mut scanner = Scanner::new();
        let tokens: Vec<Token> = scanner.scan_tokens(src).collect();

        let mut parser = Parser::new(&tokens);
        let output: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));

        let mut interpreter = Interpreter::new(output.clone());
        let mut resolver = Resolver::new(&mut interpreter);
        let parsed = parser.parse().unwrap();
        let resolved = resolver.resolve(parsed).unwrap();
        let result = interpreter.interpret(&resolved);

        match (result, err) {
            (Err(Error::RuntimeError { msg, .. }), Some(err)) => assert_eq!(err, msg),
            (Err(Error::RuntimeError { msg, .. }), None) => {
                panic!("Not expecting any error, found '{}'", msg)
            }
            (Err(other), _) => panic!("Unexpected error: {:?}", other),
            (Ok(_), Some(err)) => panic!("Expecting an error '{}', found none.", err),
            _ => {}
        }

        if let Some(out) = out {
            assert_eq!(str::from_utf8(&output.borrow()).unwrap(), out);
        }
    }

    #[test]
    fn test_programs() {
        let tests = [
            // binary and grouping expressions, with precedence
            ("print (1 + 2) * -3;", "-9\n"),
            ("print (1 + 2) * 5 + 2;", "17\n"),
            ("print \"hello \" + \"world\";", "hello world\n"),
            // the numeric domain: integers stay integers, division is
            // always a double, comparison and equality cross the tags
            ("print 7 / 2;", "3.5\n"),
            ("print 10 / 5;", "2\n"),
            ("print 2 + 0.5;", "2.5\n"),
            ("print 1 == 1.0;", "true\n"),
            ("print 2 < 3.5;", "true\n"),
            ("print 1 != \"1\";", "true\n"),
            // logical expressions yield the deciding operand
            ("print false or true;", "true\n"),
            ("print nil or \"yes\";", "yes\n"),
            ("print false and 1;", "false\n"),
            ("print 0 and 1;", "1\n"),
            // unary expressions
            ("print !true;", "false\n"),
            ("print !nil;", "true\n"),
            ("print -10.5;", "-10.5\n"),
            ("print -(-3);", "3\n"),
            // variable assignment
            (
                "var foo = \"bar\";\
                 print foo;",
                "bar\n",
            ),
            ("var a; print a;", "nil\n"),
            // printing callables
            ("print clock;", "<native fn: clock>\n"),
            (
                "fun add(a, b) { return a + b; } print add; print add(3, 4);",
                "<fn add>\n7\n",
            ),
            (
                include_str!("../data/if_else.lox"),
                include_str!("../data/if_else.lox.expected"),
            ),
            (
                include_str!("../data/while.lox"),
                include_str!("../data/while.lox.expected"),
            ),
            (
                include_str!("../data/for.lox"),
                include_str!("../data/for.lox.expected"),
            ),
            (
                include_str!("../data/binding.lox"),
                include_str!("../data/binding.lox.expected"),
            ),
            (
                include_str!("../data/fib.lox"),
                include_str!("../data/fib.lox.expected"),
            ),
            (
                include_str!("../data/make_counter.lox"),
                include_str!("../data/make_counter.lox.expected"),
            ),
            (
                include_str!("../data/class.lox"),
                include_str!("../data/class.lox.expected"),
            ),
            (
                include_str!("../data/inheritance.lox"),
                include_str!("../data/inheritance.lox.expected"),
            ),
            (
                include_str!("../data/init_return.lox"),
                include_str!("../data/init_return.lox.expected"),
            ),
        ];

        for (src, expected) in tests {
            test_statements(src, Some(expected), None);
        }
    }

    #[test]
    fn test_binary_expression_with_wrong_types() {
        let tests = [
            (
                "print 1 + \"a\";",
                "Operands must be two numbers or two strings.",
            ),
            (
                "print true + false;",
                "Operands must be two numbers or two strings.",
            ),
            ("print true - 1;", "Operands must be numbers."),
            ("print true < 1;", "Operands must be numbers."),
            ("print \"a\" > \"b\";", "Operands must be numbers."),
        ];

        for (src, expected) in tests {
            test_statements(src, None, Some(expected));
        }
    }

    #[test]
    fn test_unary_expression_with_wrong_types() {
        test_statements("-\"muffin\";", None, Some("Operand must be a number."));
    }

    #[test]
    fn test_division_by_zero() {
        let tests = [
            ("print 1 / 0;", "Division by zero."),
            ("print 1.5 / 0.0;", "Division by zero."),
        ];

        for (src, expected) in tests {
            test_statements(src, None, Some(expected));
        }
    }

    #[test]
    fn test_use_of_undefined_variable() {
        let tests = [
            ("var foo = \"bar\"; print bar;", "Undefined variable 'bar'."),
            ("bar = 1;", "Undefined variable 'bar'."),
        ];

        for (src, expected) in tests {
            test_statements(src, None, Some(expected));
        }
    }

    #[test]
    fn test_calls_require_callables_and_matching_arity() {
        let tests = [
            ("\"not a fn\"();", "Can only call functions and classes."),
            ("clock(1);", "Expected 0 arguments but got 1."),
            (
                "fun one(a) {} one(1, 2);",
                "Expected 1 arguments but got 2.",
            ),
        ];

        for (src, expected) in tests {
            test_statements(src, None, Some(expected));
        }
    }

    #[test]
    fn test_property_access_errors() {
        let tests = [
            ("print 4.x;", "Only instances have properties."),
            ("4.x = 1;", "Only instances have fields."),
            (
                "class A {} print A().missing;",
                "Undefined property 'missing'.",
            ),
            (
                "class A {} class B < A { m() { super.missing(); } } B().m();",
                "Undefined property 'missing'.",
            ),
            (
                "var NotClass = 1; class Sub < NotClass {}",
                "Superclass must be a class.",
            ),
        ];

        for (src, expected) in tests {
            test_statements(src, None, Some(expected));
        }
    }

    #[test]
    fn test_runtime_error_stops_execution() {
        // the statement after the failing one must not run
        test_statements(
            "print \"before\"; print 1 + \"a\"; print \"after\";",
            Some("before\n"),
            Some("Operands must be two numbers or two strings."),
        );
    }

    #[test]
    fn test_native_functions() {
        test_statements("clock();", None, None);
    }
}
