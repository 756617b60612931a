//! # Parser
//!
//! Recursive-descent parser over the scanner's token stream. Parse
//! errors are collected rather than thrown; the pipeline copies them
//! into the compiler log and refuses to emit a module if any are fatal.

pub mod ast;

pub use ast::*;

use crate::lexer::{SourceSpan, Token, TokenKind};

/// One collected parse diagnostic
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Rendered message
    pub message: String,
    /// Where the problem was noticed
    pub span: SourceSpan,
}

/// Recursive-descent parser.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Diagnostics collected while parsing
    pub errors: Vec<ParseError>,
}

impl Parser {
    /// New parser over a token stream (must end with `Eof`).
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    /// Parse a whole compilation unit.
    pub fn parse(&mut self) -> Ast {
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::Eof) {
            let before = self.pos;
            if let Some(stmt) = self.statement() {
                stmts.push(stmt);
            }
            if self.pos == before {
                // Ensure forward progress after an error
                self.pos += 1;
            }
        }
        Ast { stmts }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(
            self.tokens
                .last()
                .expect("token stream always holds at least Eof"),
        )
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn span(&self) -> SourceSpan {
        self.peek().span
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> bool {
        if self.eat(kind) {
            true
        } else {
            self.error(format!("Expected {}, found {:?}", what, self.peek().kind));
            false
        }
    }

    fn error(&mut self, message: String) {
        let span = self.span();
        self.errors.push(ParseError { message, span });
    }

    fn ident(&mut self, what: &str) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.bump();
                Some(s)
            }
            _ => {
                self.error(format!("Expected {}, found {:?}", what, self.peek().kind));
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Option<Stmt> {
        let span = self.span();
        let exported = self.eat(&TokenKind::Export);

        let kind = match &self.peek().kind {
            TokenKind::Import => return self.import_stmt(span),
            TokenKind::Function => {
                let decl = self.function_decl(exported)?;
                StmtKind::Function(decl)
            }
            TokenKind::Class => {
                let decl = self.class_decl(exported)?;
                StmtKind::Class(decl)
            }
            TokenKind::Format => return self.format_stmt(span, exported),
            TokenKind::Enum => return self.enum_stmt(span, exported),
            TokenKind::Let | TokenKind::Const => return self.let_stmt(span),
            TokenKind::Return => {
                self.bump();
                let value = if self.at(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semicolon, "';'");
                StmtKind::Return(value)
            }
            TokenKind::Delete => {
                self.bump();
                let e = self.expression()?;
                self.expect(&TokenKind::Semicolon, "';'");
                StmtKind::Delete(e)
            }
            TokenKind::If => return self.if_stmt(span),
            TokenKind::While => return self.while_stmt(span),
            TokenKind::Do => return self.do_while_stmt(span),
            TokenKind::For => return self.for_stmt(span),
            TokenKind::LBrace => {
                let body = self.block_body()?;
                StmtKind::Block(body)
            }
            _ => {
                let e = self.expression()?;
                self.expect(&TokenKind::Semicolon, "';'");
                StmtKind::Expr(e)
            }
        };
        Some(Stmt { kind, span })
    }

    fn import_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        self.bump();
        let module = self.ident("module name")?;
        let alias = if self.eat(&TokenKind::As) {
            Some(self.ident("import alias")?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt {
            kind: StmtKind::Import { module, alias },
            span,
        })
    }

    fn let_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        let is_const = matches!(self.peek().kind, TokenKind::Const);
        self.bump();
        let name = self.ident("variable name")?;
        let ty = if self.eat(&TokenKind::Colon) {
            Some(self.type_ref()?)
        } else {
            None
        };
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt {
            kind: StmtKind::Let {
                name,
                ty,
                init,
                is_const,
            },
            span,
        })
    }

    fn if_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        self.bump();
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')'");
        let then = Box::new(self.statement()?);
        let other = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Some(Stmt {
            kind: StmtKind::If { cond, then, other },
            span,
        })
    }

    fn while_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        self.bump();
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')'");
        let body = Box::new(self.statement()?);
        Some(Stmt {
            kind: StmtKind::While { cond, body },
            span,
        })
    }

    fn do_while_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        self.bump();
        let body = Box::new(self.statement()?);
        self.expect(&TokenKind::While, "'while'");
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')'");
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt {
            kind: StmtKind::DoWhile { body, cond },
            span,
        })
    }

    fn for_stmt(&mut self, span: SourceSpan) -> Option<Stmt> {
        self.bump();
        self.expect(&TokenKind::LParen, "'('");
        let init = if self.eat(&TokenKind::Semicolon) {
            None
        } else {
            let s = self.statement()?; // let or expression statement; eats ';'
            Some(Box::new(s))
        };
        let cond = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon, "';'");
        let step = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::RParen, "')'");
        let body = Box::new(self.statement()?);
        Some(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            span,
        })
    }

    fn format_stmt(&mut self, span: SourceSpan, exported: bool) -> Option<Stmt> {
        self.bump();
        let name = self.ident("format name")?;
        self.expect(&TokenKind::LBrace, "'{'");
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let fname = self.ident("field name")?;
            self.expect(&TokenKind::Colon, "':'");
            let fty = self.type_ref()?;
            self.expect(&TokenKind::Semicolon, "';'");
            fields.push((fname, fty));
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Some(Stmt {
            kind: StmtKind::Format {
                name,
                fields,
                exported,
            },
            span,
        })
    }

    fn enum_stmt(&mut self, span: SourceSpan, exported: bool) -> Option<Stmt> {
        self.bump();
        let name = self.ident("enum name")?;
        self.expect(&TokenKind::LBrace, "'{'");
        let mut variants = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let vname = self.ident("variant name")?;
            let value = if self.eat(&TokenKind::Assign) {
                match self.peek().kind.clone() {
                    TokenKind::Int(v) => {
                        self.bump();
                        Some(v as i64)
                    }
                    TokenKind::Minus => {
                        self.bump();
                        match self.peek().kind.clone() {
                            TokenKind::Int(v) => {
                                self.bump();
                                Some(-(v as i64))
                            }
                            _ => {
                                self.error("Expected integer after '-'".into());
                                None
                            }
                        }
                    }
                    _ => {
                        self.error("Expected integer enum value".into());
                        None
                    }
                }
            } else {
                None
            };
            variants.push((vname, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Some(Stmt {
            kind: StmtKind::Enum {
                name,
                variants,
                exported,
            },
            span,
        })
    }

    fn block_body(&mut self) -> Option<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'");
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let before = self.pos;
            if let Some(s) = self.statement() {
                stmts.push(s);
            }
            if self.pos == before {
                self.pos += 1;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Some(stmts)
    }

    fn function_decl(&mut self, exported: bool) -> Option<FunctionDecl> {
        let span = self.span();
        self.bump(); // function
        let name = self.ident("function name")?;
        let (params, ret) = self.signature_tail()?;
        let body = self.block_body()?;
        Some(FunctionDecl {
            name,
            params,
            ret,
            body,
            exported,
            span,
        })
    }

    fn signature_tail(&mut self) -> Option<(Vec<Param>, Option<TypeRef>)> {
        self.expect(&TokenKind::LParen, "'('");
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
            let pspan = self.span();
            let pname = self.ident("parameter name")?;
            self.expect(&TokenKind::Colon, "':'");
            let pty = self.type_ref()?;
            params.push(Param {
                name: pname,
                ty: pty,
                span: pspan,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'");
        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.type_ref()?)
        } else {
            None
        };
        Some((params, ret))
    }

    fn class_decl(&mut self, exported: bool) -> Option<ClassDecl> {
        let span = self.span();
        self.bump(); // class
        let name = self.ident("class name")?;
        let mut bases = Vec::new();
        if self.eat(&TokenKind::Colon) {
            loop {
                bases.push(self.type_ref()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::LBrace, "'{'");

        let mut props = Vec::new();
        let mut methods = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let mspan = self.span();
            let is_static = self.eat(&TokenKind::Static);

            match self.peek().kind.clone() {
                TokenKind::Constructor => {
                    self.bump();
                    let (params, ret) = self.signature_tail()?;
                    let body = self.block_body()?;
                    methods.push(MethodDecl {
                        decl: FunctionDecl {
                            name: "constructor".into(),
                            params,
                            ret,
                            body,
                            exported: false,
                            span: mspan,
                        },
                        is_static,
                        kind: MethodKind::Constructor,
                    });
                }
                TokenKind::Destructor => {
                    self.bump();
                    let (params, ret) = self.signature_tail()?;
                    let body = self.block_body()?;
                    methods.push(MethodDecl {
                        decl: FunctionDecl {
                            name: "destructor".into(),
                            params,
                            ret,
                            body,
                            exported: false,
                            span: mspan,
                        },
                        is_static,
                        kind: MethodKind::Destructor,
                    });
                }
                TokenKind::Function => {
                    self.bump();
                    let mname = self.ident("method name")?;
                    let (params, ret) = self.signature_tail()?;
                    let body = self.block_body()?;
                    methods.push(MethodDecl {
                        decl: FunctionDecl {
                            name: mname,
                            params,
                            ret,
                            body,
                            exported: false,
                            span: mspan,
                        },
                        is_static,
                        kind: MethodKind::Normal,
                    });
                }
                TokenKind::Ident(pname) => {
                    self.bump();
                    self.expect(&TokenKind::Colon, "':'");
                    let pty = self.type_ref()?;
                    self.expect(&TokenKind::Semicolon, "';'");
                    props.push(PropDecl {
                        name: pname,
                        ty: pty,
                        is_static,
                        span: mspan,
                    });
                }
                other => {
                    self.error(format!("Unexpected token in class body: {:?}", other));
                    self.bump();
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Some(ClassDecl {
            name,
            bases,
            props,
            methods,
            exported,
            span,
        })
    }

    fn type_ref(&mut self) -> Option<TypeRef> {
        let span = self.span();
        let first = self.ident("type name")?;
        let (module, name) = if self.at(&TokenKind::Dot) {
            // Module-qualified type: Module.Type
            self.bump();
            let second = self.ident("type name")?;
            (Some(first), second)
        } else {
            (None, first)
        };

        let mut template_args = Vec::new();
        if self.eat(&TokenKind::Lt) {
            loop {
                template_args.push(self.type_ref()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt, "'>'");
        }
        Some(TypeRef {
            module,
            name,
            template_args,
            span,
        })
    }

    // ------------------------------------------------------------------
    // Expressions, by descending precedence
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Option<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Option<Expr> {
        let lhs = self.conditional()?;
        if self.at(&TokenKind::Assign) {
            let span = self.span();
            self.bump();
            let value = self.assignment()?;
            return Some(Expr {
                kind: ExprKind::Assign {
                    target: Box::new(lhs),
                    value: Box::new(value),
                },
                span,
            });
        }
        Some(lhs)
    }

    fn conditional(&mut self) -> Option<Expr> {
        let cond = self.logical_or()?;
        if self.eat(&TokenKind::Question) {
            let span = cond.span;
            let then = self.expression()?;
            self.expect(&TokenKind::Colon, "':'");
            let other = self.expression()?;
            return Some(Expr {
                kind: ExprKind::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    other: Box::new(other),
                },
                span,
            });
        }
        Some(cond)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Option<Expr>,
        table: &[(TokenKind, BinaryOp)],
    ) -> Option<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (tok, op) in table {
                if self.at(tok) {
                    let span = self.span();
                    self.bump();
                    let rhs = next(self)?;
                    lhs = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        span,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Some(lhs)
    }

    fn logical_or(&mut self) -> Option<Expr> {
        self.binary_level(Self::logical_and, &[(TokenKind::OrOr, BinaryOp::LogicalOr)])
    }

    fn logical_and(&mut self) -> Option<Expr> {
        self.binary_level(Self::bit_or, &[(TokenKind::AndAnd, BinaryOp::LogicalAnd)])
    }

    fn bit_or(&mut self) -> Option<Expr> {
        self.binary_level(Self::bit_xor, &[(TokenKind::Pipe, BinaryOp::BitOr)])
    }

    fn bit_xor(&mut self) -> Option<Expr> {
        self.binary_level(Self::bit_and, &[(TokenKind::Caret, BinaryOp::BitXor)])
    }

    fn bit_and(&mut self) -> Option<Expr> {
        self.binary_level(Self::equality, &[(TokenKind::Amp, BinaryOp::BitAnd)])
    }

    fn equality(&mut self) -> Option<Expr> {
        self.binary_level(
            Self::relational,
            &[
                (TokenKind::Eq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::NotEq),
            ],
        )
    }

    fn relational(&mut self) -> Option<Expr> {
        self.binary_level(
            Self::shift,
            &[
                (TokenKind::LtEq, BinaryOp::LtEq),
                (TokenKind::GtEq, BinaryOp::GtEq),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn shift(&mut self) -> Option<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
        )
    }

    fn additive(&mut self) -> Option<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
        )
    }

    fn multiplicative(&mut self) -> Option<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        )
    }

    fn unary(&mut self) -> Option<Expr> {
        let span = self.span();
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::PlusPlus => Some(UnaryOp::PreInc),
            TokenKind::MinusMinus => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.unary()?;
            return Some(Expr {
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                span,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;
        loop {
            let span = self.span();
            if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
                    args.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "')'");
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "']'");
                expr = Expr {
                    kind: ExprKind::Index {
                        obj: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                };
            } else if self.eat(&TokenKind::Dot) {
                let name = self.ident("member name")?;
                expr = Expr {
                    kind: ExprKind::Member {
                        obj: Box::new(expr),
                        name,
                    },
                    span,
                };
            } else {
                break;
            }
        }
        Some(expr)
    }

    fn primary(&mut self) -> Option<Expr> {
        let span = self.span();
        let kind = match self.peek().kind.clone() {
            TokenKind::Int(v) => {
                self.bump();
                ExprKind::IntLit(v)
            }
            TokenKind::Float(v) => {
                self.bump();
                ExprKind::FloatLit(v)
            }
            TokenKind::Str(s) => {
                self.bump();
                ExprKind::StrLit(s)
            }
            TokenKind::True => {
                self.bump();
                ExprKind::BoolLit(true)
            }
            TokenKind::False => {
                self.bump();
                ExprKind::BoolLit(false)
            }
            TokenKind::Null => {
                self.bump();
                ExprKind::NullLit
            }
            TokenKind::This => {
                self.bump();
                ExprKind::This
            }
            TokenKind::New => {
                self.bump();
                let ty = self.type_ref()?;
                let mut args = Vec::new();
                if self.eat(&TokenKind::LParen) {
                    while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
                        args.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "')'");
                }
                ExprKind::New { ty, args }
            }
            TokenKind::Ident(name) => {
                self.bump();
                ExprKind::Ident(name)
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'");
                return Some(inner);
            }
            other => {
                self.error(format!("Expected expression, found {:?}", other));
                return None;
            }
        };
        Some(Expr { kind, span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(src: &str) -> (Ast, Vec<ParseError>) {
        let tokens = Scanner::new(src).scan_tokens();
        let mut p = Parser::new(tokens);
        let ast = p.parse();
        (ast, p.errors)
    }

    #[test]
    fn parses_exported_function() {
        let (ast, errs) = parse("export function main() : i32 { return 2 + 3 * 4; }");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(ast.stmts.len(), 1);
        match &ast.stmts[0].kind {
            StmtKind::Function(f) => {
                assert_eq!(f.name, "main");
                assert!(f.exported);
                assert_eq!(f.ret.as_ref().unwrap().name, "i32");
                assert_eq!(f.body.len(), 1);
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_binds_tighter() {
        let (ast, errs) = parse("let x = 2 + 3 * 4;");
        assert!(errs.is_empty());
        let StmtKind::Let { init: Some(e), .. } = &ast.stmts[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Binary { op, rhs, .. } = &e.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_class_with_members() {
        let src = r#"
            class Point {
                x : f32;
                y : f32;
                constructor(x: f32, y: f32) { this.x = x; this.y = y; }
                function magSq() : f32 { return this.x * this.x + this.y * this.y; }
            }
        "#;
        let (ast, errs) = parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let StmtKind::Class(c) = &ast.stmts[0].kind else {
            panic!("expected class");
        };
        assert_eq!(c.props.len(), 2);
        assert_eq!(c.methods.len(), 2);
        assert_eq!(c.methods[0].kind, MethodKind::Constructor);
    }

    #[test]
    fn parses_template_type_ref() {
        let (ast, errs) = parse("let a = new Array<i32>();");
        assert!(errs.is_empty(), "{errs:?}");
        let StmtKind::Let { init: Some(e), .. } = &ast.stmts[0].kind else {
            panic!("expected let");
        };
        let ExprKind::New { ty, .. } = &e.kind else {
            panic!("expected new");
        };
        assert_eq!(ty.name, "Array");
        assert_eq!(ty.template_args.len(), 1);
        assert_eq!(ty.template_args[0].name, "i32");
    }

    #[test]
    fn parses_control_flow() {
        let src = r#"
            function f(n: i32) : i32 {
                let acc : i32 = 0;
                for (let i : i32 = 0; i < n; i = i + 1) {
                    if (i % 2 == 0) { acc = acc + i; } else { acc = acc - 1; }
                }
                while (acc > 100) { acc = acc / 2; }
                do { acc = acc + 1; } while (acc < 0);
                return acc;
            }
        "#;
        let (_, errs) = parse(src);
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn recovers_from_errors() {
        let (_, errs) = parse("function () { }");
        assert!(!errs.is_empty());
    }

    #[test]
    fn parses_enum() {
        let (ast, errs) = parse("enum Color { Red, Green = 5, Blue }");
        assert!(errs.is_empty(), "{errs:?}");
        let StmtKind::Enum { variants, .. } = &ast.stmts[0].kind else {
            panic!("expected enum");
        };
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[1], ("Green".to_string(), Some(5)));
    }
}
