mod ast;

pub use ast::*;

use common::{DbError, DbResult};
use expr::{BinaryOp, Expr, UnaryOp};
use lexer::{Keyword, Spanned, Token};
use types::{SqlType, Value};

/// Parse SQL text (one or more `;`-separated statements) into the internal AST.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let tokens = lexer::tokenize(sql).map_err(|e| DbError::Parser(e.to_string()))?;
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();

    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.at_eof() {
            break;
        }
        statements.push(parser.parse_statement()?);
        if !parser.eat(&Token::Semicolon) && !parser.at_eof() {
            return Err(parser.unexpected("';' or end of input"));
        }
    }

    Ok(statements)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == want {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if matches!(self.peek(), Token::Keyword(k) if *k == kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: &Token) -> DbResult<()> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(self.unexpected(&want.to_string()))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> DbResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(kw.text()))
        }
    }

    fn unexpected(&self, expected: &str) -> DbError {
        DbError::Parser(format!(
            "expected {expected}, found '{}'",
            self.peek()
        ))
    }

    fn expect_ident(&mut self) -> DbResult<String> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            // A handful of type/identifier-like keywords are allowed to stand
            // in as identifiers (e.g. a column literally named `key`).
            Token::Keyword(kw) => {
                self.advance();
                Ok(kw.text().to_lowercase())
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> DbResult<Statement> {
        match self.peek().clone() {
            Token::Keyword(Keyword::Select) => Ok(Statement::Select(self.parse_select()?)),
            Token::Keyword(Keyword::Insert) => self.parse_insert(),
            Token::Keyword(Keyword::Update) => self.parse_update(),
            Token::Keyword(Keyword::Delete) => self.parse_delete(),
            Token::Keyword(Keyword::Create) => self.parse_create(),
            Token::Keyword(Keyword::Drop) => self.parse_drop(),
            Token::Keyword(Keyword::Explain) => self.parse_explain(),
            _ => Err(self.unexpected("a statement keyword")),
        }
    }

    fn parse_explain(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Explain)?;
        let analyze = self.eat_keyword(Keyword::Analyze);
        let statement = Box::new(self.parse_statement()?);
        Ok(Statement::Explain { statement, analyze })
    }

    fn parse_create(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Create)?;
        if self.eat_keyword(Keyword::Table) {
            self.parse_create_table()
        } else if self.eat_keyword(Keyword::Index) {
            self.parse_create_index()
        } else {
            Err(self.unexpected("TABLE or INDEX"))
        }
    }

    fn parse_create_table(&mut self) -> DbResult<Statement> {
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;

        let mut columns = Vec::new();
        let mut constraints = Vec::new();
        loop {
            if self.starts_table_constraint() {
                constraints.push(self.parse_table_constraint()?);
            } else {
                columns.push(self.parse_column_def()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;

        if columns.is_empty() {
            return Err(DbError::Parser(
                "CREATE TABLE requires at least one column".into(),
            ));
        }

        Ok(Statement::CreateTable {
            name,
            columns,
            constraints,
        })
    }

    fn starts_table_constraint(&self) -> bool {
        matches!(
            self.peek(),
            Token::Keyword(Keyword::Primary)
                | Token::Keyword(Keyword::Unique)
                | Token::Keyword(Keyword::Foreign)
                | Token::Keyword(Keyword::Check)
        )
    }

    fn parse_table_constraint(&mut self) -> DbResult<TableConstraint> {
        if self.eat_keyword(Keyword::Primary) {
            self.expect_keyword(Keyword::Key)?;
            Ok(TableConstraint::PrimaryKey(self.parse_ident_list()?))
        } else if self.eat_keyword(Keyword::Unique) {
            Ok(TableConstraint::Unique(self.parse_ident_list()?))
        } else if self.eat_keyword(Keyword::Foreign) {
            self.expect_keyword(Keyword::Key)?;
            let columns = self.parse_ident_list()?;
            self.expect_keyword(Keyword::References)?;
            let ref_table = self.expect_ident()?;
            let ref_columns = self.parse_ident_list()?;
            Ok(TableConstraint::ForeignKey {
                columns,
                ref_table,
                ref_columns,
            })
        } else if self.eat_keyword(Keyword::Check) {
            self.expect(&Token::LParen)?;
            let expr = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            Ok(TableConstraint::Check(expr))
        } else {
            Err(self.unexpected("a table constraint"))
        }
    }

    fn parse_ident_list(&mut self) -> DbResult<Vec<String>> {
        self.expect(&Token::LParen)?;
        let mut names = vec![self.expect_ident()?];
        while self.eat(&Token::Comma) {
            names.push(self.expect_ident()?);
        }
        self.expect(&Token::RParen)?;
        Ok(names)
    }

    fn parse_column_def(&mut self) -> DbResult<ColumnDef> {
        let name = self.expect_ident()?;
        let ty = self.parse_sql_type()?;
        let mut constraints = Vec::new();

        loop {
            if self.eat_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null)?;
                constraints.push(ColumnConstraint::NotNull);
            } else if self.eat_keyword(Keyword::Null) {
                // explicit NULL is the (default) absence of NOT NULL
            } else if self.eat_keyword(Keyword::Primary) {
                self.expect_keyword(Keyword::Key)?;
                constraints.push(ColumnConstraint::PrimaryKey);
            } else if self.eat_keyword(Keyword::Unique) {
                constraints.push(ColumnConstraint::Unique);
            } else if self.eat_keyword(Keyword::AutoIncrement) {
                constraints.push(ColumnConstraint::AutoIncrement);
            } else if self.eat_keyword(Keyword::Default) {
                constraints.push(ColumnConstraint::Default(self.parse_primary()?));
            } else if self.eat_keyword(Keyword::References) {
                let table = self.expect_ident()?;
                self.expect(&Token::LParen)?;
                let column = self.expect_ident()?;
                self.expect(&Token::RParen)?;
                constraints.push(ColumnConstraint::References { table, column });
            } else {
                break;
            }
        }

        Ok(ColumnDef {
            name,
            ty,
            constraints,
        })
    }

    fn parse_sql_type(&mut self) -> DbResult<SqlType> {
        let name = self.expect_ident()?.to_ascii_uppercase();
        Ok(match name.as_str() {
            "INT" | "INTEGER" => SqlType::Int,
            "TEXT" => SqlType::Text,
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "FLOAT" | "REAL" => SqlType::Float,
            "DOUBLE" => SqlType::Double,
            "DATE" => SqlType::Date,
            "TIME" => SqlType::Time,
            "DATETIME" => SqlType::DateTime,
            "TIMESTAMP" => SqlType::Timestamp,
            "VARCHAR" => SqlType::Varchar(self.parse_type_width()?.unwrap_or(255)),
            "CHAR" => SqlType::Char(self.parse_type_width()?.unwrap_or(1)),
            "DECIMAL" | "NUMERIC" => {
                let (p, s) = self.parse_decimal_params()?;
                SqlType::Decimal(p, s)
            }
            other => return Err(DbError::Parser(format!("unknown type '{other}'"))),
        })
    }

    fn parse_type_width(&mut self) -> DbResult<Option<u32>> {
        if !self.eat(&Token::LParen) {
            return Ok(None);
        }
        let n = self.expect_number_literal()? as u32;
        self.expect(&Token::RParen)?;
        Ok(Some(n))
    }

    fn parse_decimal_params(&mut self) -> DbResult<(u8, u8)> {
        if !self.eat(&Token::LParen) {
            return Ok((10, 0));
        }
        let precision = self.expect_number_literal()? as u8;
        let scale = if self.eat(&Token::Comma) {
            self.expect_number_literal()? as u8
        } else {
            0
        };
        self.expect(&Token::RParen)?;
        Ok((precision, scale))
    }

    fn expect_number_literal(&mut self) -> DbResult<i64> {
        match self.advance() {
            Token::Number(n) => n
                .parse::<i64>()
                .map_err(|_| DbError::Parser(format!("invalid integer literal '{n}'"))),
            other => Err(DbError::Parser(format!("expected a number, found '{other}'"))),
        }
    }

    fn parse_create_index(&mut self) -> DbResult<Statement> {
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::On)?;
        let table = self.expect_ident()?;
        let columns = self.parse_ident_list()?;
        Ok(Statement::CreateIndex {
            name,
            table,
            columns,
        })
    }

    fn parse_drop(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Drop)?;
        if self.eat_keyword(Keyword::Table) {
            Ok(Statement::DropTable {
                name: self.expect_ident()?,
            })
        } else if self.eat_keyword(Keyword::Index) {
            Ok(Statement::DropIndex {
                name: self.expect_ident()?,
            })
        } else {
            Err(self.unexpected("TABLE or INDEX"))
        }
    }

    fn parse_insert(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.expect_ident()?;

        let columns = if matches!(self.peek(), Token::LParen) {
            Some(self.parse_ident_list()?)
        } else {
            None
        };

        self.expect_keyword(Keyword::Values)?;
        let mut rows = vec![self.parse_value_row()?];
        while self.eat(&Token::Comma) {
            rows.push(self.parse_value_row()?);
        }

        Ok(Statement::Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_value_row(&mut self) -> DbResult<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut values = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            values.push(self.parse_expr()?);
        }
        self.expect(&Token::RParen)?;
        Ok(values)
    }

    fn parse_update(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::Set)?;

        let mut assignments = vec![self.parse_assignment()?];
        while self.eat(&Token::Comma) {
            assignments.push(self.parse_assignment()?);
        }

        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Statement::Update {
            table,
            assignments,
            selection,
        })
    }

    fn parse_assignment(&mut self) -> DbResult<(String, Expr)> {
        let column = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        let value = self.parse_expr()?;
        Ok((column, value))
    }

    fn parse_delete(&mut self) -> DbResult<Statement> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.expect_ident()?;
        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Delete { table, selection })
    }

    fn parse_select(&mut self) -> DbResult<SelectStatement> {
        self.expect_keyword(Keyword::Select)?;

        let mut items = vec![self.parse_select_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_select_item()?);
        }

        self.expect_keyword(Keyword::From)?;
        let from = self.expect_ident()?;
        let from_alias = self.parse_optional_alias()?;

        let join = self.parse_optional_join()?;

        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let group_by = if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            let mut exprs = vec![self.parse_expr()?];
            while self.eat(&Token::Comma) {
                exprs.push(self.parse_expr()?);
            }
            exprs
        } else {
            Vec::new()
        };

        let order_by = if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            let mut order = vec![self.parse_order_by_expr()?];
            while self.eat(&Token::Comma) {
                order.push(self.parse_order_by_expr()?);
            }
            order
        } else {
            Vec::new()
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_primary()?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_primary()?)
        } else {
            None
        };

        Ok(SelectStatement {
            items,
            from,
            from_alias,
            join,
            selection,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_optional_alias(&mut self) -> DbResult<Option<String>> {
        if self.eat_keyword(Keyword::As) {
            Ok(Some(self.expect_ident()?))
        } else if matches!(self.peek(), Token::Ident(_)) {
            Ok(Some(self.expect_ident()?))
        } else {
            Ok(None)
        }
    }

    fn parse_optional_join(&mut self) -> DbResult<Option<JoinClause>> {
        let kind = if self.eat_keyword(Keyword::Inner) {
            self.expect_keyword(Keyword::Join)?;
            JoinKind::Inner
        } else if self.eat_keyword(Keyword::Left) {
            self.expect_keyword(Keyword::Join)?;
            JoinKind::Left
        } else if self.eat_keyword(Keyword::Right) {
            self.expect_keyword(Keyword::Join)?;
            JoinKind::Right
        } else if self.eat_keyword(Keyword::Join) {
            JoinKind::Inner
        } else {
            return Ok(None);
        };

        let table = self.expect_ident()?;
        let alias = self.parse_optional_alias()?;
        self.expect_keyword(Keyword::On)?;
        let on = self.parse_expr()?;

        Ok(Some(JoinClause {
            kind,
            table,
            alias,
            on,
        }))
    }

    fn parse_select_item(&mut self) -> DbResult<SelectItem> {
        if self.eat(&Token::Star) {
            return Ok(SelectItem::Wildcard);
        }

        if let Token::Ident(name) = self.peek().clone() {
            if let Some(func) = AggFunc::lookup(&name) {
                if matches!(self.peek_at(1), Token::LParen) {
                    self.advance();
                    self.expect(&Token::LParen)?;
                    let arg = if self.eat(&Token::Star) {
                        AggArg::Star
                    } else {
                        AggArg::Column(self.parse_qualified_name()?)
                    };
                    self.expect(&Token::RParen)?;
                    return Ok(SelectItem::Aggregate { func, arg });
                }
            }
        }

        // A bare column reference renders as `SelectItem::Column`; anything
        // else (arithmetic, literals) is a general projected expression.
        let start = self.pos;
        if matches!(self.peek(), Token::Ident(_)) {
            let name = self.parse_qualified_name()?;
            let is_terminator = matches!(
                self.peek(),
                Token::Comma | Token::Keyword(Keyword::From) | Token::Ident(_)
            );
            if is_terminator {
                return Ok(SelectItem::Column(name));
            }
            self.pos = start;
        }

        Ok(SelectItem::Expr(self.parse_expr()?))
    }

    fn parse_qualified_name(&mut self) -> DbResult<String> {
        let first = self.expect_ident()?;
        if self.eat(&Token::Dot) {
            let second = self.expect_ident()?;
            Ok(format!("{first}.{second}"))
        } else {
            Ok(first)
        }
    }

    fn parse_order_by_expr(&mut self) -> DbResult<OrderByExpr> {
        let column = self.parse_qualified_name()?;
        let direction = if self.eat_keyword(Keyword::Desc) {
            SortDirection::Desc
        } else {
            self.eat_keyword(Keyword::Asc);
            SortDirection::Asc
        };
        Ok(OrderByExpr { column, direction })
    }

    // ---- expressions ----
    // expr := or_expr
    // or_expr := and_expr { OR and_expr }
    // and_expr := not_expr { AND not_expr }
    // not_expr := [ NOT ] comparison
    // comparison := additive { cmp_op additive }
    // additive := multiplicative { ('+' | '-') multiplicative }
    // multiplicative := primary { ('*' | '/' | '%') primary }

    fn parse_expr(&mut self) -> DbResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> DbResult<Expr> {
        if self.eat_keyword(Keyword::Not) {
            let expr = self.parse_not()?;
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Neq => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> DbResult<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(parse_number_literal(&n))),
            Token::String(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Keyword(Keyword::Null) => Ok(Expr::Literal(Value::Null)),
            Token::Keyword(Keyword::True) => Ok(Expr::Literal(Value::Bool(true))),
            Token::Keyword(Keyword::False) => Ok(Expr::Literal(Value::Bool(false))),
            Token::Minus => {
                let inner = self.parse_primary()?;
                Ok(Expr::Binary {
                    left: Box::new(Expr::Literal(Value::Int(0))),
                    op: BinaryOp::Sub,
                    right: Box::new(inner),
                })
            }
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                if self.eat(&Token::Dot) {
                    let column = self.expect_ident()?;
                    Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    })
                } else {
                    Ok(Expr::Column { table: None, name })
                }
            }
            other => Err(DbError::Parser(format!(
                "expected an expression, found '{other}'"
            ))),
        }
    }
}

fn parse_number_literal(text: &str) -> Value {
    if let Some((whole, frac)) = text.split_once('.') {
        let scale = frac.len() as u8;
        let unscaled: i128 = format!("{whole}{frac}").parse().unwrap_or(0);
        Value::Decimal(unscaled, scale)
    } else {
        text.parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::Int(0))
    }
}
