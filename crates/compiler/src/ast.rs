//! Parse Tree
//!
//! Transient AST nodes, bump-allocated in an arena that is dropped once
//! code generation finishes. Nodes are `Copy` and reference arena slices,
//! so the tree is cheap to build and needs no destructors. String literals
//! are stored fully unescaped.

use std::fmt::Write as _;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Capability kinds named in `allow` declarations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllowKind {
    Exec,
    Net,
    Read,
    Write,
    Env,
}

impl AllowKind {
    pub fn name(self) -> &'static str {
        match self {
            AllowKind::Exec => "exec",
            AllowKind::Net => "net",
            AllowKind::Read => "read",
            AllowKind::Write => "write",
            AllowKind::Env => "env",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Expr<'a> {
    pub line: u32,
    pub kind: ExprKind<'a>,
}

#[derive(Clone, Copy, Debug)]
pub enum ExprKind<'a> {
    Number(f64),
    Str(&'a str),
    Bool(bool),
    Nil,
    Variable(&'a str),
    Unary {
        op: UnaryOp,
        operand: &'a Expr<'a>,
    },
    Binary {
        op: BinaryOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Call {
        callee: &'a Expr<'a>,
        args: &'a [Expr<'a>],
    },
    List(&'a [Expr<'a>]),
    MapLit {
        keys: &'a [Expr<'a>],
        values: &'a [Expr<'a>],
    },
    Index {
        object: &'a Expr<'a>,
        index: &'a Expr<'a>,
    },
    IndexSet {
        object: &'a Expr<'a>,
        index: &'a Expr<'a>,
        value: &'a Expr<'a>,
    },
    Property {
        object: &'a Expr<'a>,
        name: &'a str,
    },
    PropertySet {
        object: &'a Expr<'a>,
        name: &'a str,
        value: &'a Expr<'a>,
    },
    Pipe {
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Range {
        start: &'a Expr<'a>,
        end: &'a Expr<'a>,
    },
    Lambda {
        params: &'a [&'a str],
        body: &'a [Stmt<'a>],
    },
    /// `exec expr` sugar: a call to the `exec` builtin.
    ExecSugar {
        command: &'a Expr<'a>,
    },
    Match {
        subject: &'a Expr<'a>,
        arms: &'a [MatchArm<'a>],
    },
}

#[derive(Clone, Copy, Debug)]
pub struct MatchArm<'a> {
    pub line: u32,
    /// None is the wildcard `_`.
    pub pattern: Option<&'a Expr<'a>>,
    pub body: ArmBody<'a>,
}

#[derive(Clone, Copy, Debug)]
pub enum ArmBody<'a> {
    Expr(&'a Expr<'a>),
    Block(&'a [Stmt<'a>]),
}

#[derive(Clone, Copy, Debug)]
pub struct Stmt<'a> {
    pub line: u32,
    pub kind: StmtKind<'a>,
}

#[derive(Clone, Copy, Debug)]
pub enum StmtKind<'a> {
    Expression(&'a Expr<'a>),
    /// `let x = e` or bare `x = e`; the code generator decides between
    /// rebind, new local, and global.
    VarDecl {
        name: &'a str,
        initializer: &'a Expr<'a>,
    },
    CompoundAssign {
        name: &'a str,
        op: BinaryOp,
        value: &'a Expr<'a>,
    },
    FnDecl {
        name: &'a str,
        params: &'a [&'a str],
        body: &'a [Stmt<'a>],
    },
    Block(&'a [Stmt<'a>]),
    If {
        condition: &'a Expr<'a>,
        then_branch: &'a [Stmt<'a>],
        /// A `Block` or a chained `If` statement.
        else_branch: Option<&'a Stmt<'a>>,
    },
    While {
        condition: &'a Expr<'a>,
        body: &'a [Stmt<'a>],
    },
    For {
        var: &'a str,
        iterable: &'a Expr<'a>,
        body: &'a [Stmt<'a>],
    },
    Return(Option<&'a Expr<'a>>),
    Break,
    Continue,
    Allow {
        kind: AllowKind,
        target: &'a str,
    },
    Parallel(&'a [Stmt<'a>]),
    OnFailure(&'a [Stmt<'a>]),
    Import {
        path: &'a str,
        alias: Option<&'a str>,
    },
}

// ---- Debug dump ----

/// Render the tree with two-space indentation, one node per line. Used by
/// the `ast` CLI verb.
pub fn dump_program(stmts: &[Stmt<'_>]) -> String {
    let mut out = String::new();
    for stmt in stmts {
        dump_stmt(stmt, 0, &mut out);
    }
    out
}

fn pad(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn dump_stmt(stmt: &Stmt<'_>, depth: usize, out: &mut String) {
    pad(depth, out);
    match stmt.kind {
        StmtKind::Expression(e) => {
            out.push_str("ExprStmt\n");
            dump_expr(e, depth + 1, out);
        }
        StmtKind::VarDecl { name, initializer } => {
            let _ = writeln!(out, "VarDecl {name}");
            dump_expr(initializer, depth + 1, out);
        }
        StmtKind::CompoundAssign { name, op, value } => {
            let _ = writeln!(out, "CompoundAssign {name} {}=", op.name());
            dump_expr(value, depth + 1, out);
        }
        StmtKind::FnDecl { name, params, body } => {
            let _ = writeln!(out, "FnDecl {name}({})", params.join(", "));
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::Block(stmts) => {
            out.push_str("Block\n");
            for s in stmts {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("If\n");
            dump_expr(condition, depth + 1, out);
            pad(depth + 1, out);
            out.push_str("Then\n");
            for s in then_branch {
                dump_stmt(s, depth + 2, out);
            }
            if let Some(else_stmt) = else_branch {
                pad(depth + 1, out);
                out.push_str("Else\n");
                dump_stmt(else_stmt, depth + 2, out);
            }
        }
        StmtKind::While { condition, body } => {
            out.push_str("While\n");
            dump_expr(condition, depth + 1, out);
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::For {
            var,
            iterable,
            body,
        } => {
            let _ = writeln!(out, "For {var}");
            dump_expr(iterable, depth + 1, out);
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::Return(value) => {
            out.push_str("Return\n");
            if let Some(e) = value {
                dump_expr(e, depth + 1, out);
            }
        }
        StmtKind::Break => out.push_str("Break\n"),
        StmtKind::Continue => out.push_str("Continue\n"),
        StmtKind::Allow { kind, target } => {
            let _ = writeln!(out, "Allow {} {target:?}", kind.name());
        }
        StmtKind::Parallel(stmts) => {
            out.push_str("Parallel\n");
            for s in stmts {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::OnFailure(stmts) => {
            out.push_str("OnFailure\n");
            for s in stmts {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::Import { path, alias } => match alias {
            Some(alias) => {
                let _ = writeln!(out, "Import {path:?} as {alias}");
            }
            None => {
                let _ = writeln!(out, "Import {path:?}");
            }
        },
    }
}

fn dump_expr(expr: &Expr<'_>, depth: usize, out: &mut String) {
    pad(depth, out);
    match expr.kind {
        ExprKind::Number(n) => {
            let _ = writeln!(out, "Number {n}");
        }
        ExprKind::Str(s) => {
            let _ = writeln!(out, "String {s:?}");
        }
        ExprKind::Bool(b) => {
            let _ = writeln!(out, "Bool {b}");
        }
        ExprKind::Nil => out.push_str("Nil\n"),
        ExprKind::Variable(name) => {
            let _ = writeln!(out, "Variable {name}");
        }
        ExprKind::Unary { op, operand } => {
            let _ = writeln!(
                out,
                "Unary {}",
                match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Not => "not",
                }
            );
            dump_expr(operand, depth + 1, out);
        }
        ExprKind::Binary { op, left, right } => {
            let _ = writeln!(out, "Binary {}", op.name());
            dump_expr(left, depth + 1, out);
            dump_expr(right, depth + 1, out);
        }
        ExprKind::Call { callee, args } => {
            out.push_str("Call\n");
            dump_expr(callee, depth + 1, out);
            for arg in args {
                dump_expr(arg, depth + 1, out);
            }
        }
        ExprKind::List(elements) => {
            out.push_str("List\n");
            for e in elements {
                dump_expr(e, depth + 1, out);
            }
        }
        ExprKind::MapLit { keys, values } => {
            out.push_str("Map\n");
            for (k, v) in keys.iter().zip(values) {
                dump_expr(k, depth + 1, out);
                dump_expr(v, depth + 2, out);
            }
        }
        ExprKind::Index { object, index } => {
            out.push_str("Index\n");
            dump_expr(object, depth + 1, out);
            dump_expr(index, depth + 1, out);
        }
        ExprKind::IndexSet {
            object,
            index,
            value,
        } => {
            out.push_str("IndexSet\n");
            dump_expr(object, depth + 1, out);
            dump_expr(index, depth + 1, out);
            dump_expr(value, depth + 1, out);
        }
        ExprKind::Property { object, name } => {
            let _ = writeln!(out, "Property {name}");
            dump_expr(object, depth + 1, out);
        }
        ExprKind::PropertySet {
            object,
            name,
            value,
        } => {
            let _ = writeln!(out, "PropertySet {name}");
            dump_expr(object, depth + 1, out);
            dump_expr(value, depth + 1, out);
        }
        ExprKind::Pipe { left, right } => {
            out.push_str("Pipe\n");
            dump_expr(left, depth + 1, out);
            dump_expr(right, depth + 1, out);
        }
        ExprKind::Range { start, end } => {
            out.push_str("Range\n");
            dump_expr(start, depth + 1, out);
            dump_expr(end, depth + 1, out);
        }
        ExprKind::Lambda { params, body } => {
            let _ = writeln!(out, "Lambda({})", params.join(", "));
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        ExprKind::ExecSugar { command } => {
            out.push_str("Exec\n");
            dump_expr(command, depth + 1, out);
        }
        ExprKind::Match { subject, arms } => {
            out.push_str("Match\n");
            dump_expr(subject, depth + 1, out);
            for arm in arms {
                pad(depth + 1, out);
                match arm.pattern {
                    Some(_) => out.push_str("Arm\n"),
                    None => out.push_str("Arm _\n"),
                }
                if let Some(pattern) = arm.pattern {
                    dump_expr(pattern, depth + 2, out);
                }
                match arm.body {
                    ArmBody::Expr(e) => dump_expr(e, depth + 2, out),
                    ArmBody::Block(stmts) => {
                        for s in stmts {
                            dump_stmt(s, depth + 2, out);
                        }
                    }
                }
            }
        }
    }
}
