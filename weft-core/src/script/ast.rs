//! Syntax Trees
//!
//! The parser produces a small tagged tree: literals, dotted variable
//! paths, calls, blocks and selector fragments. Trees are shared (`Rc`)
//! because parse results are memoized and compiled operands keep a handle
//! to the fragment they were built from.

use std::rc::Rc;

/// One parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Number(f64),
    Str(Rc<str>),
    /// A dotted variable path, e.g. `post.author.name`.
    Variable { path: Rc<str> },
    /// A named call over parsed arguments. Operators parse into calls
    /// with the operator text as the name.
    Call { name: Rc<str>, args: Vec<Rc<Ast>> },
    /// A block literal `{ |params| body }`. The body is a comma sequence.
    Block { params: Vec<Rc<str>>, body: Vec<Rc<Ast>> },
    /// An element selector fragment, preserved as text. Selectors parse
    /// but do not compile; matching happens outside this crate.
    Selector(Rc<str>),
}

/// A parsed source: one tree per comma-separated top-level expression.
pub type AstList = Vec<Rc<Ast>>;

impl Ast {
    pub fn number(value: f64) -> Rc<Ast> {
        Rc::new(Ast::Number(value))
    }

    pub fn string(value: &str) -> Rc<Ast> {
        Rc::new(Ast::Str(Rc::from(value)))
    }

    pub fn variable(path: &str) -> Rc<Ast> {
        Rc::new(Ast::Variable { path: Rc::from(path) })
    }

    pub fn call(name: &str, args: Vec<Rc<Ast>>) -> Rc<Ast> {
        Rc::new(Ast::Call { name: Rc::from(name), args })
    }

    pub fn block(params: Vec<&str>, body: Vec<Rc<Ast>>) -> Rc<Ast> {
        Rc::new(Ast::Block {
            params: params.into_iter().map(Rc::from).collect(),
            body,
        })
    }

    /// Structural depth, used to order recomputation so arguments settle
    /// before the calls that consume them.
    pub fn depth(&self) -> u32 {
        match self {
            Ast::Number(_) | Ast::Str(_) | Ast::Variable { .. } | Ast::Selector(_) => 0,
            // A block operand contributes a constant handle; its body
            // ranks independently when instances bind.
            Ast::Block { .. } => 0,
            Ast::Call { args, .. } => {
                1 + args.iter().map(|a| a.depth()).max().unwrap_or(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_call_nesting() {
        let ast = Ast::call(
            "add",
            vec![
                Ast::variable("x"),
                Ast::call("mul", vec![Ast::variable("x"), Ast::number(2.0)]),
            ],
        );
        assert_eq!(ast.depth(), 2);
        assert_eq!(Ast::variable("x").depth(), 0);
    }

    #[test]
    fn blocks_rank_as_leaves() {
        let ast = Ast::call(
            "if",
            vec![
                Ast::variable("cond"),
                Ast::block(vec![], vec![Ast::call("add", vec![Ast::number(1.0), Ast::number(2.0)])]),
            ],
        );
        assert_eq!(ast.depth(), 1);
    }
}
