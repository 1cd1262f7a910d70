//! Salary formula language.
//!
//! Grammar: decimal literals, identifiers, `+ - * /` (also `− × ÷`), unary
//! minus and parentheses. Nothing else parses: no calls, no attribute access,
//! no comparisons. Identifiers are case-insensitive and must all be present in
//! the context before anything is evaluated.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{PayrollError, Result};

const MAX_FORMULA_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// Variables visible to a formula.
#[derive(Debug, Clone, Default)]
pub struct FormulaContext {
    vars: BTreeMap<String, Decimal>,
}

impl FormulaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// `basic`, `gross` and `days`.
    pub fn payroll(basic: Decimal, gross: Decimal, days: Decimal) -> Self {
        Self::new()
            .with("basic", basic)
            .with("gross", gross)
            .with("days", days)
    }

    pub fn with(mut self, name: &str, value: Decimal) -> Self {
        self.vars.insert(name.to_ascii_lowercase(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: Decimal) {
        self.vars.insert(name.to_ascii_lowercase(), value);
    }

    fn get(&self, name: &str) -> Option<Decimal> {
        self.vars.get(name).copied()
    }
}

fn invalid(formula: &str, reason: impl Into<String>) -> PayrollError {
    PayrollError::InvalidFormula {
        formula: formula.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' | '−' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' | '×' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' | '÷' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if literal.matches('.').count() > 1 || literal == "." {
                    return Err(format!("malformed number `{literal}` at {pos}"));
                }
                let normalized = match (literal.starts_with('.'), literal.ends_with('.')) {
                    (true, _) => format!("0{literal}"),
                    (_, true) => format!("{literal}0"),
                    _ => literal.clone(),
                };
                let value = Decimal::from_str(&normalized)
                    .map_err(|_| format!("malformed number `{literal}` at {pos}"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d.to_ascii_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character `{other}` at {pos}")),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackOp {
    Bin(BinOp),
    Neg,
    Open,
}

fn precedence(op: StackOp) -> u8 {
    match op {
        StackOp::Bin(BinOp::Add | BinOp::Sub) => 1,
        StackOp::Bin(BinOp::Mul | BinOp::Div) => 2,
        StackOp::Neg => 3,
        StackOp::Open => 0,
    }
}

fn reduce(op: StackOp, output: &mut Vec<Expr>) -> std::result::Result<(), String> {
    match op {
        StackOp::Neg => {
            let operand = output.pop().ok_or("missing operand")?;
            output.push(Expr::Neg(Box::new(operand)));
        }
        StackOp::Bin(bin) => {
            let rhs = output.pop().ok_or("missing operand")?;
            let lhs = output.pop().ok_or("missing operand")?;
            output.push(Expr::Binary(bin, Box::new(lhs), Box::new(rhs)));
        }
        StackOp::Open => return Err("unbalanced parentheses".to_string()),
    }
    Ok(())
}

fn push_binary(
    op: BinOp,
    ops: &mut Vec<StackOp>,
    output: &mut Vec<Expr>,
) -> std::result::Result<(), String> {
    let incoming = StackOp::Bin(op);
    while let Some(&top) = ops.last() {
        if top == StackOp::Open || precedence(top) < precedence(incoming) {
            break;
        }
        ops.pop();
        reduce(top, output)?;
    }
    ops.push(incoming);
    Ok(())
}

fn build(tokens: Vec<Token>) -> std::result::Result<Expr, String> {
    let mut output: Vec<Expr> = Vec::new();
    let mut ops: Vec<StackOp> = Vec::new();
    let mut expect_operand = true;

    for token in tokens {
        match token {
            Token::Number(_) | Token::Ident(_) if !expect_operand => {
                return Err("missing operator between operands".to_string());
            }
            Token::Number(value) => {
                output.push(Expr::Number(value));
                expect_operand = false;
            }
            Token::Ident(name) => {
                output.push(Expr::Var(name));
                expect_operand = false;
            }
            Token::Plus if expect_operand => {}
            Token::Minus if expect_operand => ops.push(StackOp::Neg),
            Token::Star | Token::Slash if expect_operand => {
                return Err("operator without left operand".to_string());
            }
            Token::Plus => {
                push_binary(BinOp::Add, &mut ops, &mut output)?;
                expect_operand = true;
            }
            Token::Minus => {
                push_binary(BinOp::Sub, &mut ops, &mut output)?;
                expect_operand = true;
            }
            Token::Star => {
                push_binary(BinOp::Mul, &mut ops, &mut output)?;
                expect_operand = true;
            }
            Token::Slash => {
                push_binary(BinOp::Div, &mut ops, &mut output)?;
                expect_operand = true;
            }
            Token::Open if !expect_operand => {
                return Err("function calls and implicit multiplication are not allowed".to_string());
            }
            Token::Open => ops.push(StackOp::Open),
            Token::Close if expect_operand => {
                return Err("empty parentheses or dangling operator".to_string());
            }
            Token::Close => {
                loop {
                    match ops.pop() {
                        Some(StackOp::Open) => break,
                        Some(op) => reduce(op, &mut output)?,
                        None => return Err("unbalanced parentheses".to_string()),
                    }
                }
                expect_operand = false;
            }
        }
    }

    if expect_operand {
        return Err("expression is empty or ends with an operator".to_string());
    }
    while let Some(op) = ops.pop() {
        reduce(op, &mut output)?;
    }

    match (output.pop(), output.is_empty()) {
        (Some(expr), true) => Ok(expr),
        _ => Err("malformed expression".to_string()),
    }
}

/// Parses `formula` into an expression tree.
pub fn parse(formula: &str) -> Result<Expr> {
    if formula.trim().is_empty() {
        return Err(invalid(formula, "formula is empty"));
    }
    if formula.len() > MAX_FORMULA_LEN {
        return Err(invalid(formula, "formula is too long"));
    }
    let tokens = tokenize(formula).map_err(|reason| invalid(formula, reason))?;
    build(tokens).map_err(|reason| invalid(formula, reason))
}

impl Expr {
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(inner) => inner.collect_vars(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
        }
    }

    fn eval(&self, ctx: &FormulaContext) -> std::result::Result<Decimal, String> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Var(name) => ctx
                .get(name)
                .ok_or_else(|| format!("unknown variable `{name}`")),
            Expr::Neg(inner) => Ok(-inner.eval(ctx)?),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(ctx)?;
                let r = rhs.eval(ctx)?;
                let value = match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    BinOp::Div => {
                        if r.is_zero() {
                            return Err("division by zero".to_string());
                        }
                        l.checked_div(r)
                    }
                };
                value.ok_or_else(|| "arithmetic overflow".to_string())
            }
        }
    }
}

/// Evaluates `formula` against `ctx` at full precision.
pub fn evaluate(formula: &str, ctx: &FormulaContext) -> Result<Decimal> {
    let expr = parse(formula)?;

    let unknown: Vec<String> = expr
        .variables()
        .into_iter()
        .filter(|name| ctx.get(name).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(invalid(
            formula,
            format!("unknown variable(s): {}", unknown.join(", ")),
        ));
    }

    expr.eval(ctx).map_err(|reason| invalid(formula, reason))
}
