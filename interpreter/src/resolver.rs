use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use finch_core::{Literal, Token};
use log::debug;

use crate::ast::{Expr, ExprVisitor, FunctionDecl, Stmt, StmtVisitor};
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::parser::StmtStream;

enum State {
    Declared,
    Defined,
}

#[derive(Copy, Clone)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Copy, Clone)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Static resolution pass. Walks the whole program once before evaluation,
/// recording an environment depth for every local variable use and
/// collecting every static error it finds. It never executes anything and
/// never aborts early; if any error was recorded, evaluation must not
/// start.
pub struct Resolver<'a> {
    scopes: Vec<HashMap<String, State>>,
    interpreter: &'a mut Interpreter,
    current_fun: FunctionType,
    current_cls: ClassType,
    loop_depth: usize,
    errors: Vec<Error>,
}

pub struct ResolvedStmts(pub(crate) Vec<Stmt>);

impl<'a> Resolver<'a> {
    pub fn new(interpreter: &'a mut Interpreter) -> Self {
        Resolver {
            scopes: Vec::new(),
            interpreter,
            current_fun: FunctionType::None,
            current_cls: ClassType::None,
            loop_depth: 0,
            errors: Vec::new(),
        }
    }

    pub fn resolve(&mut self, stmts: StmtStream) -> Result<ResolvedStmts, Vec<Error>> {
        debug!("resolving {} top-level statement(s)", stmts.0.len());
        self.resolve_stmts(&stmts.0);

        if self.errors.is_empty() {
            Ok(ResolvedStmts(stmts.0))
        } else {
            Err(mem::take(&mut self.errors))
        }
    }

    fn resolve_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            // The visitor methods stash their errors in self.errors and
            // always return Ok, so the walk covers the whole program.
            let _ = self.visit_stmt(stmt);
        }
    }

    fn error(&mut self, token: &Token, msg: &str) {
        self.errors.push(Error::resolve_error(token, msg));
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop().unwrap();
    }

    // Globals are exempt from declaration bookkeeping: the REPL relies on
    // being able to re-declare a top-level name.
    fn declare(&mut self, token: &Token) {
        let Some(last) = self.scopes.last_mut() else {
            return;
        };

        if last.contains_key(&token.lexeme) {
            self.error(token, "Already a variable with this name in this scope.");
        } else {
            last.insert(token.lexeme.clone(), State::Declared);
        }
    }

    fn define(&mut self, token: &Token) {
        if let Some(last) = self.scopes.last_mut() {
            last.insert(token.lexeme.clone(), State::Defined);
        }
    }

    fn resolve_local(&mut self, token: &Token) {
        for i in (0..self.scopes.len()).rev() {
            if self.scopes[i].contains_key(&token.lexeme) {
                self.interpreter.resolve(token, self.scopes.len() - 1 - i);
                return;
            }
        }
    }

    fn resolve_function(&mut self, decl: &FunctionDecl, ty: FunctionType) {
        let enclosing = self.current_fun;
        self.current_fun = ty;

        // break/continue cannot reach out of a function body into a loop
        // surrounding the declaration
        let enclosing_loops = mem::replace(&mut self.loop_depth, 0);

        self.begin_scope();
        for param in &decl.params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_stmts(&decl.body);
        self.end_scope();

        self.loop_depth = enclosing_loops;
        self.current_fun = enclosing;
    }
}

impl<'a> StmtVisitor for Resolver<'a> {
    type Item = ();

    fn visit_block(&mut self, statements: &[Stmt]) -> Result<Self::Item, Error> {
        self.begin_scope();
        self.resolve_stmts(statements);
        self.end_scope();
        Ok(())
    }

    fn visit_expression(&mut self, expression: &Expr) -> Result<Self::Item, Error> {
        self.visit_expr(expression)
    }

    fn visit_function(&mut self, decl: &Rc<FunctionDecl>) -> Result<Self::Item, Error> {
        self.declare(&decl.name);
        self.define(&decl.name);
        self.resolve_function(decl, FunctionType::Function);
        Ok(())
    }

    fn visit_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<Self::Item, Error> {
        let enclosing = self.current_cls;
        self.current_cls = ClassType::Class;
        self.declare(name);
        self.define(name);

        let mut has_superclass = false;
        if let Some(Expr::Variable { name: super_name }) = superclass {
            if super_name.lexeme == name.lexeme {
                self.error(super_name, "A class can't inherit from itself.");
            } else {
                self.current_cls = ClassType::Subclass;
                has_superclass = true;
                let _ = self.visit_variable(super_name);
                self.begin_scope();
                self.scopes
                    .last_mut()
                    .unwrap()
                    .insert("super".to_string(), State::Defined);
            }
        }

        self.begin_scope();
        self.scopes
            .last_mut()
            .unwrap()
            .insert("this".to_string(), State::Defined);

        for method in methods {
            let ty = if method.name.lexeme == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };

            self.resolve_function(method, ty);
        }

        self.end_scope();
        if has_superclass {
            self.end_scope();
        }

        self.current_cls = enclosing;
        Ok(())
    }

    fn visit_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(condition);
        let _ = self.visit_stmt(then_branch);
        if let Some(else_branch) = else_branch {
            let _ = self.visit_stmt(else_branch);
        }
        Ok(())
    }

    fn visit_while(
        &mut self,
        condition: &Expr,
        body: &Stmt,
        increment: Option<&Expr>,
        _token: &Token,
    ) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(condition);

        self.loop_depth += 1;
        let _ = self.visit_stmt(body);
        self.loop_depth -= 1;

        if let Some(increment) = increment {
            let _ = self.visit_expr(increment);
        }
        Ok(())
    }

    fn visit_print(&mut self, expression: &Expr) -> Result<Self::Item, Error> {
        self.visit_expr(expression)
    }

    fn visit_return(&mut self, keyword: &Token, value: Option<&Expr>) -> Result<Self::Item, Error> {
        if let FunctionType::None = self.current_fun {
            self.error(keyword, "Can't return from top-level code.");
        }

        if let Some(value) = value {
            if let FunctionType::Initializer = self.current_fun {
                self.error(keyword, "Can't return a value from an initializer.");
            } else {
                let _ = self.visit_expr(value);
            }
        }
        Ok(())
    }

    fn visit_break(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        if self.loop_depth == 0 {
            self.error(keyword, "Cannot use 'break' outside of a loop.");
        }
        Ok(())
    }

    fn visit_continue(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        if self.loop_depth == 0 {
            self.error(keyword, "Cannot use 'continue' outside of a loop.");
        }
        Ok(())
    }

    fn visit_var(&mut self, name: &Token, init: Option<&Expr>) -> Result<Self::Item, Error> {
        self.declare(name);
        if let Some(init) = init {
            let _ = self.visit_expr(init);
        }
        self.define(name);
        Ok(())
    }
}

impl<'a> ExprVisitor for Resolver<'a> {
    type Item = ();

    fn visit_assign(&mut self, name: &Token, value: &Expr) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(value);
        self.resolve_local(name);
        Ok(())
    }

    fn visit_binary(&mut self, left: &Expr, _: &Token, right: &Expr) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(left);
        self.visit_expr(right)
    }

    fn visit_call(&mut self, callee: &Expr, _: &Token, args: &[Expr]) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(callee);
        for arg in args {
            let _ = self.visit_expr(arg);
        }
        Ok(())
    }

    fn visit_get(&mut self, object: &Expr, _: &Token) -> Result<Self::Item, Error> {
        self.visit_expr(object)
    }

    fn visit_set(&mut self, object: &Expr, _: &Token, value: &Expr) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(object);
        self.visit_expr(value)
    }

    fn visit_this(&mut self, keyword: &Token) -> Result<Self::Item, Error> {
        if let ClassType::None = self.current_cls {
            self.error(keyword, "Can't use 'this' outside of a class.");
            return Ok(());
        }

        self.resolve_local(keyword);
        Ok(())
    }

    fn visit_super(&mut self, keyword: &Token, _method: &Token) -> Result<Self::Item, Error> {
        match self.current_cls {
            ClassType::None => {
                self.error(keyword, "Can't use 'super' outside of a class.");
            }
            ClassType::Class => {
                self.error(keyword, "Can't use 'super' in a class with no superclass.");
            }
            ClassType::Subclass => {
                self.resolve_local(keyword);
            }
        }
        Ok(())
    }

    fn visit_grouping(&mut self, expression: &Expr) -> Result<Self::Item, Error> {
        self.visit_expr(expression)
    }

    fn visit_literal(&mut self, _value: &Literal) -> Result<Self::Item, Error> {
        Ok(())
    }

    fn visit_logical(&mut self, left: &Expr, _: &Token, right: &Expr) -> Result<Self::Item, Error> {
        let _ = self.visit_expr(left);
        self.visit_expr(right)
    }

    fn visit_unary(&mut self, _: &Token, right: &Expr) -> Result<Self::Item, Error> {
        self.visit_expr(right)
    }

    fn visit_variable(&mut self, name: &Token) -> Result<Self::Item, Error> {
        // Check if variable is being accessed in its own initializer,
        // which means the variable is declared, but its value not bound yet
        if let Some(last) = self.scopes.last() {
            if let Some(State::Declared) = last.get(&name.lexeme) {
                self.error(name, "Can't read local variable in its own initializer.");
                return Ok(());
            }
        }

        self.resolve_local(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use finch_core::{Scanner, Token};

    use crate::error::Error;
    use crate::interpreter::Interpreter;
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn resolve_src(src: &str) -> Result<(), Vec<String>> {
        let mut scanner = Scanner::new();
        let tokens: Vec<Token> = scanner.scan_tokens(src).collect();

        let mut parser = Parser::new(&tokens);
        let parsed = parser.parse().unwrap();

        let output: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let mut interpreter = Interpreter::new(output);
        let mut resolver = Resolver::new(&mut interpreter);

        match resolver.resolve(parsed) {
            Ok(_) => Ok(()),
            Err(errs) => Err(errs
                .into_iter()
                .map(|err| match err {
                    Error::ResolveError { msg, .. } => msg,
                    other => other.to_string(),
                })
                .collect()),
        }
    }

    fn assert_static_error(src: &str, expected: &str) {
        match resolve_src(src) {
            Ok(()) => panic!("expected static error '{}' for: {}", expected, src),
            Err(msgs) => assert!(
                msgs.iter().any(|msg| msg == expected),
                "expected '{}' in {:?} for: {}",
                expected,
                msgs,
                src
            ),
        }
    }

    #[test]
    fn test_valid_programs_resolve() {
        let tests = [
            "var a = 1; print a;",
            // globals may be re-declared, the REPL depends on it
            "var a = 1; var a = 2;",
            "fun f(x) { return x; } print f(1);",
            "fun f() { return; }",
            "while (true) { break; }",
            "for (var i = 0; i < 3; i = i + 1) { continue; }",
            "class A { init() { this.x = 1; return; } }",
            "class A {} class B < A { m() { return super.m; } }",
            // shadowing in distinct scopes is fine
            "var a = 1; { var a = 2; { var a = 3; } }",
        ];

        for src in tests {
            assert_eq!(resolve_src(src), Ok(()), "source: {}", src);
        }
    }

    #[test]
    fn test_duplicate_declaration_in_scope() {
        assert_static_error(
            "{ var a = 1; var a = 2; }",
            "Already a variable with this name in this scope.",
        );
        assert_static_error(
            "fun f(a) { var a = 1; }",
            "Already a variable with this name in this scope.",
        );
    }

    #[test]
    fn test_read_in_own_initializer() {
        assert_static_error(
            "{ var a = a; }",
            "Can't read local variable in its own initializer.",
        );
    }

    #[test]
    fn test_top_level_return() {
        assert_static_error("return 1;", "Can't return from top-level code.");
    }

    #[test]
    fn test_return_value_from_initializer() {
        assert_static_error(
            "class A { init() { return 1; } }",
            "Can't return a value from an initializer.",
        );
    }

    #[test]
    fn test_this_outside_class() {
        assert_static_error("print this;", "Can't use 'this' outside of a class.");
        assert_static_error(
            "fun notAMethod() { print this; }",
            "Can't use 'this' outside of a class.",
        );
    }

    #[test]
    fn test_super_misuse() {
        assert_static_error("print super.x;", "Can't use 'super' outside of a class.");
        assert_static_error(
            "class A { m() { super.m(); } }",
            "Can't use 'super' in a class with no superclass.",
        );
    }

    #[test]
    fn test_loop_control_outside_loop() {
        assert_static_error("break;", "Cannot use 'break' outside of a loop.");
        assert_static_error("continue;", "Cannot use 'continue' outside of a loop.");
        // a function body shields its statements from an enclosing loop
        assert_static_error(
            "while (true) { fun f() { break; } }",
            "Cannot use 'break' outside of a loop.",
        );
    }

    #[test]
    fn test_self_inheritance() {
        assert_static_error("class A < A {}", "A class can't inherit from itself.");
    }

    #[test]
    fn test_errors_accumulate() {
        let errs = resolve_src("break; return 1; print this;").unwrap_err();
        assert_eq!(errs.len(), 3);
    }
}
