use finch_core::Literal;

use crate::ast::Expr;

/// Renders an expression in parenthesised prefix form, e.g.
/// `(* (group (+ 1 2)) (- 3))`. Only used for tracing and tests.
pub(crate) struct AstPrinter;

impl AstPrinter {
    pub(crate) fn print(expr: &Expr) -> String {
        match expr {
            Expr::Literal { value } => match value {
                Literal::Str(s) => format!("\"{}\"", s),
                Literal::Int(n) => n.to_string(),
                Literal::Num(n) => n.to_string(),
                Literal::Bool(b) => b.to_string(),
                Literal::Nil => "nil".into(),
            },

            Expr::Grouping { expression } => format!("(group {})", Self::print(expression)),

            Expr::Unary { operator, right } => {
                format!("({} {})", operator.lexeme, Self::print(right))
            }

            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            Expr::Variable { name } => name.lexeme.clone(),

            Expr::Assign { name, value } => {
                format!("(= {} {})", name.lexeme, Self::print(value))
            }

            Expr::Call { callee, args, .. } => {
                let mut out = format!("(call {}", Self::print(callee));
                for arg in args {
                    out.push(' ');
                    out.push_str(&Self::print(arg));
                }
                out.push(')');
                out
            }

            Expr::Get { object, name } => {
                format!("(get {} {})", name.lexeme, Self::print(object))
            }

            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(set {} {} {})",
                name.lexeme,
                Self::print(object),
                Self::print(value)
            ),

            Expr::This { .. } => "this".into(),

            Expr::Super { method, .. } => format!("(super {})", method.lexeme),
        }
    }
}
