//! AST and recursive-descent parser for the sandbox language.
//!
//! A Python-shaped subset: expressions with full operator precedence, calls
//! with keyword arguments, attribute and index access, tuple/list/dict
//! literals, assignment (including tuple unpacking and index targets),
//! augmented assignment, `if`/`elif`/`else`, `while`, `for … in`, `import`,
//! `break`/`continue`/`pass`.

use super::lexer::{tokenize, Tok, Token};
use super::value::{BinOp, CmpOp};
use super::SandboxErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    None,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attr {
        obj: Box<Expr>,
        name: String,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    /// Tuple unpacking: `a, b, c = …`
    Tuple(Vec<String>),
    /// Index assignment: `d["k"] = …`, `l[0] = …`
    Index { name: String, index: Expr },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: Target,
        value: Expr,
    },
    AugAssign {
        name: String,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Import {
        module: String,
    },
    Break,
    Continue,
    Pass,
}

/// Parse the code as a single expression. Fails on anything else — the
/// caller falls back to `parse_module`.
pub fn parse_expression(code: &str) -> Result<Expr, SandboxErrorKind> {
    let tokens = tokenize(code)?;
    let mut parser = Parser::new(tokens);
    parser.skip_newlines();
    let expr = parser.parse_expr_or_tuple()?;
    parser.skip_newlines();
    parser.expect_end()?;
    Ok(expr)
}

/// Parse the code as a statement list.
pub fn parse_module(code: &str) -> Result<Vec<Stmt>, SandboxErrorKind> {
    let tokens = tokenize(code)?;
    let mut parser = Parser::new(tokens);
    let mut stmts = Vec::new();
    parser.skip_newlines();
    while !parser.at_end() {
        stmts.push(parser.parse_stmt()?);
        parser.skip_newlines();
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map_or(&Tok::End, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), SandboxErrorKind> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(&format!("期望 {tok:?}，得到 {:?}", self.peek())))
        }
    }

    fn error(&self, msg: &str) -> SandboxErrorKind {
        SandboxErrorKind::Syntax(format!("第 {} 行: {msg}", self.line()))
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), Tok::End)
    }

    fn expect_end(&mut self) -> Result<(), SandboxErrorKind> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error(&format!("多余的输入: {:?}", self.peek())))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.pos += 1;
        }
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, SandboxErrorKind> {
        match self.peek() {
            Tok::KwIf => self.parse_if(),
            Tok::KwWhile => self.parse_while(),
            Tok::KwFor => self.parse_for(),
            _ => {
                let stmt = self.parse_simple_stmt()?;
                if !matches!(self.peek(), Tok::Newline | Tok::End | Tok::Dedent) {
                    return Err(self.error(&format!("语句后多余的输入: {:?}", self.peek())));
                }
                self.eat(&Tok::Newline);
                Ok(stmt)
            }
        }
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, SandboxErrorKind> {
        match self.peek() {
            Tok::KwImport => {
                self.advance();
                let mut module = match self.advance() {
                    Tok::Ident(name) => name,
                    other => return Err(self.error(&format!("import 后期望模块名，得到 {other:?}"))),
                };
                // Dotted module path: only the top level matters for the allowlist
                while self.eat(&Tok::Dot) {
                    match self.advance() {
                        Tok::Ident(part) => module = format!("{module}.{part}"),
                        other => {
                            return Err(self.error(&format!("模块路径中期望名称，得到 {other:?}")))
                        }
                    }
                }
                Ok(Stmt::Import { module })
            }
            Tok::KwBreak => {
                self.advance();
                Ok(Stmt::Break)
            }
            Tok::KwContinue => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Tok::KwPass => {
                self.advance();
                Ok(Stmt::Pass)
            }
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, SandboxErrorKind> {
        let expr = self.parse_expr_or_tuple()?;

        if let Some(op) = match self.peek() {
            Tok::PlusAssign => Some(BinOp::Add),
            Tok::MinusAssign => Some(BinOp::Sub),
            Tok::StarAssign => Some(BinOp::Mul),
            Tok::SlashAssign => Some(BinOp::Div),
            _ => None,
        } {
            self.advance();
            let name = match expr {
                Expr::Name(name) => name,
                _ => return Err(self.error("增量赋值目标必须是变量名")),
            };
            let value = self.parse_expr_or_tuple()?;
            return Ok(Stmt::AugAssign { name, op, value });
        }

        if self.eat(&Tok::Assign) {
            let target = self.to_target(expr)?;
            let value = self.parse_expr_or_tuple()?;
            return Ok(Stmt::Assign { target, value });
        }

        Ok(Stmt::Expr(expr))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SandboxErrorKind> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Expr::Name(name) => names.push(name),
                        _ => return Err(self.error("解包目标必须是变量名")),
                    }
                }
                Ok(Target::Tuple(names))
            }
            Expr::Index { obj, index } => match *obj {
                Expr::Name(name) => Ok(Target::Index {
                    name,
                    index: *index,
                }),
                _ => Err(self.error("索引赋值目标必须是变量名")),
            },
            _ => Err(self.error("非法赋值目标")),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, SandboxErrorKind> {
        self.expect(Tok::KwIf)?;
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(Tok::Colon)?;
        branches.push((cond, self.parse_suite()?));

        let mut orelse = Vec::new();
        loop {
            if self.eat(&Tok::KwElif) {
                let cond = self.parse_expr()?;
                self.expect(Tok::Colon)?;
                branches.push((cond, self.parse_suite()?));
            } else if self.eat(&Tok::KwElse) {
                self.expect(Tok::Colon)?;
                orelse = self.parse_suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn parse_while(&mut self) -> Result<Stmt, SandboxErrorKind> {
        self.expect(Tok::KwWhile)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::Colon)?;
        let body = self.parse_suite()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<Stmt, SandboxErrorKind> {
        self.expect(Tok::KwFor)?;
        let target_expr = self.parse_expr_or_tuple_no_in()?;
        let target = self.to_target(target_expr)?;
        self.expect(Tok::KwIn)?;
        let iter = self.parse_expr()?;
        self.expect(Tok::Colon)?;
        let body = self.parse_suite()?;
        Ok(Stmt::For { target, iter, body })
    }

    /// Suite: inline single statement, or an indented block.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, SandboxErrorKind> {
        if self.eat(&Tok::Newline) {
            self.skip_newlines();
            self.expect(Tok::Indent)?;
            let mut stmts = Vec::new();
            self.skip_newlines();
            while !matches!(self.peek(), Tok::Dedent | Tok::End) {
                stmts.push(self.parse_stmt()?);
                self.skip_newlines();
            }
            self.eat(&Tok::Dedent);
            if stmts.is_empty() {
                return Err(self.error("空代码块"));
            }
            Ok(stmts)
        } else {
            let stmt = self.parse_simple_stmt()?;
            self.eat(&Tok::Newline);
            Ok(vec![stmt])
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    /// Expression list: `a, b, c` becomes a tuple without parentheses.
    fn parse_expr_or_tuple(&mut self) -> Result<Expr, SandboxErrorKind> {
        let first = self.parse_expr()?;
        if !matches!(self.peek(), Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if matches!(
                self.peek(),
                Tok::Newline | Tok::End | Tok::Assign | Tok::Colon
            ) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Like `parse_expr_or_tuple`, but stops before `in` (for-loop targets).
    fn parse_expr_or_tuple_no_in(&mut self) -> Result<Expr, SandboxErrorKind> {
        let first = self.parse_postfix()?;
        if !matches!(self.peek(), Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if matches!(self.peek(), Tok::KwIn) {
                break;
            }
            items.push(self.parse_postfix()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_expr(&mut self) -> Result<Expr, SandboxErrorKind> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SandboxErrorKind> {
        let mut left = self.parse_and()?;
        while self.eat(&Tok::KwOr) {
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOpKind::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SandboxErrorKind> {
        let mut left = self.parse_not()?;
        while self.eat(&Tok::KwAnd) {
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOpKind::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SandboxErrorKind> {
        if self.eat(&Tok::KwNot) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SandboxErrorKind> {
        let left = self.parse_arith()?;
        let op = match self.peek() {
            Tok::EqEq => CmpOp::Eq,
            Tok::NotEq => CmpOp::Ne,
            Tok::Lt => CmpOp::Lt,
            Tok::LtEq => CmpOp::Le,
            Tok::Gt => CmpOp::Gt,
            Tok::GtEq => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_arith()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, SandboxErrorKind> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, SandboxErrorKind> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, SandboxErrorKind> {
        if self.eat(&Tok::Minus) {
            let operand = self.parse_factor()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Tok::Plus) {
            return self.parse_factor();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, SandboxErrorKind> {
        let base = self.parse_postfix()?;
        if self.eat(&Tok::DoubleStar) {
            // Right-associative
            let exponent = self.parse_factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SandboxErrorKind> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Tok::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Tok::Ident(name) => name,
                        other => {
                            return Err(self.error(&format!("'.' 后期望属性名，得到 {other:?}")))
                        }
                    };
                    expr = Expr::Attr {
                        obj: Box::new(expr),
                        name,
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    if matches!(self.peek(), Tok::Colon) {
                        return Err(self.error("不支持切片，请用 tail(x, n) 取尾部"));
                    }
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SandboxErrorKind> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // `name=expr` is a keyword argument when `name` is a bare identifier
            let is_kwarg = matches!(self.peek(), Tok::Ident(_))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.tok),
                    Some(Tok::Assign)
                );
            if is_kwarg {
                let name = match self.advance() {
                    Tok::Ident(name) => name,
                    _ => unreachable!(),
                };
                self.advance(); // '='
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("位置参数不能跟在关键字参数之后"));
                }
                args.push(self.parse_expr()?);
            }
            if self.eat(&Tok::Comma) {
                if self.eat(&Tok::RParen) {
                    break;
                }
                continue;
            }
            self.expect(Tok::RParen)?;
            break;
        }
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr, SandboxErrorKind> {
        match self.advance() {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => Ok(Expr::Name(name)),
            Tok::KwTrue => Ok(Expr::True),
            Tok::KwFalse => Ok(Expr::False),
            Tok::KwNone => Ok(Expr::None),
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat(&Tok::Comma) {
                    let mut items = vec![first];
                    while !matches!(self.peek(), Tok::RParen) {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(Tok::RParen)?;
                    return Ok(Expr::Tuple(items));
                }
                self.expect(Tok::RParen)?;
                Ok(first)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                while !matches!(self.peek(), Tok::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut items = Vec::new();
                while !matches!(self.peek(), Tok::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(Tok::Colon)?;
                    let value = self.parse_expr()?;
                    items.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBrace)?;
                Ok(Expr::Dict(items))
            }
            other => Err(self.error(&format!("非法表达式开头: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_expression() {
        assert!(parse_expression("1 + 2 * 3").is_ok());
        assert!(parse_expression("ta.rsi(df.close, 14)").is_ok());
    }

    #[test]
    fn rejects_statements_as_expression() {
        assert!(parse_expression("x = 1").is_err());
        assert!(parse_expression("x = 1\nx + 1").is_err());
    }

    #[test]
    fn parses_module_with_assignment() {
        let stmts = parse_module("x = 1\nx + 1").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0], Stmt::Assign { .. }));
        assert!(matches!(stmts[1], Stmt::Expr(_)));
    }

    #[test]
    fn parses_tuple_unpacking() {
        let stmts = parse_module("upper, mid, lower = bbands(df.close, 20, 2)").unwrap();
        match &stmts[0] {
            Stmt::Assign {
                target: Target::Tuple(names),
                ..
            } => assert_eq!(names, &["upper", "mid", "lower"]),
            other => panic!("expected tuple assign, got {other:?}"),
        }
    }

    #[test]
    fn parses_while_with_inline_body() {
        let stmts = parse_module("x=0\nwhile True: x+=1").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_if_elif_else_block() {
        let code = "if x > 1:\n    y = 1\nelif x < 0:\n    y = 2\nelse:\n    y = 3";
        let stmts = parse_module(code).unwrap();
        match &stmts[0] {
            Stmt::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_over_range() {
        let stmts = parse_module("s = 0\nfor i in range(10):\n    s += i").unwrap();
        assert!(matches!(stmts[1], Stmt::For { .. }));
    }

    #[test]
    fn parses_kwargs() {
        let expr = parse_expression("macd(close, fast=12, slow=26)").unwrap();
        match expr {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs.len(), 2);
                assert_eq!(kwargs[0].0, "fast");
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parses_dict_literal() {
        let expr = parse_expression("{'rsi': 1, 'sma': 2}").unwrap();
        assert!(matches!(expr, Expr::Dict(items) if items.len() == 2));
    }

    #[test]
    fn parses_negative_index() {
        assert!(parse_expression("close[-1]").is_ok());
    }

    #[test]
    fn slices_are_rejected_with_hint() {
        let err = parse_expression("close[-20:]").unwrap_err();
        match err {
            SandboxErrorKind::Syntax(msg) => assert!(msg.contains("tail")),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn parses_index_assignment_target() {
        let stmts = parse_module("d['k'] = 1").unwrap();
        assert!(matches!(
            &stmts[0],
            Stmt::Assign {
                target: Target::Index { .. },
                ..
            }
        ));
    }

    #[test]
    fn parses_import() {
        let stmts = parse_module("import numpy").unwrap();
        assert!(matches!(&stmts[0], Stmt::Import { module } if module == "numpy"));
    }
}
