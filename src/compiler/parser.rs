//! Policy expression parsing.
//!
//! This module provides tokenization and parsing of rule and macro
//! expressions into the [`crate::ast`] tree consumed by the compiler.

use crate::ast::{Array, ArrayItem, CompareOp, Expr, MacroAst, Primary, RuleAst};
use crate::error::{PolicyError, Position, Result};

/// Tokens in a policy expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Identifier(String),
    Str(String),
    Pattern(String),
    Regex(String),
    Number(i64),
    True,
    False,
    And,
    Or,
    Not,
    In,
    Op(CompareOp),
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: Position,
}

struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn position(&mut self) -> Position {
        let offset = self
            .chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len());
        Position {
            line: self.line,
            column: self.column,
            offset,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, pos: Position, message: impl Into<String>) -> PolicyError {
        syntax_error(self.source, pos, message)
    }

    fn quoted(&mut self, start: Position) -> Result<String> {
        // opening quote
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => break,
                },
                Some(ch) => value.push(ch),
                None => break,
            }
        }
        Err(self.error(start, "unterminated string literal"))
    }

    fn raw_quoted(&mut self, start: Position) -> Result<String> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') if self.peek() == Some('"') => {
                    self.bump();
                    value.push('"');
                }
                Some(ch) => value.push(ch),
                None => return Err(self.error(start, "unterminated regex literal")),
            }
        }
    }
}

fn syntax_error(source: &str, position: Position, message: impl Into<String>) -> PolicyError {
    PolicyError::Syntax {
        expression: source.to_string(),
        position,
        message: message.into(),
    }
}

/// Tokenize a policy expression.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut scanner = Scanner::new(source);

    while let Some(ch) = scanner.peek() {
        let pos = scanner.position();
        let token = match ch {
            ' ' | '\t' | '\n' | '\r' => {
                scanner.bump();
                continue;
            }
            '(' => {
                scanner.bump();
                Token::LeftParen
            }
            ')' => {
                scanner.bump();
                Token::RightParen
            }
            '[' => {
                scanner.bump();
                Token::LeftBracket
            }
            ']' => {
                scanner.bump();
                Token::RightBracket
            }
            ',' => {
                scanner.bump();
                Token::Comma
            }
            '"' => Token::Str(scanner.quoted(pos)?),
            '~' => {
                scanner.bump();
                if scanner.peek() != Some('"') {
                    return Err(scanner.error(pos, "expected '\"' after '~'"));
                }
                Token::Pattern(scanner.quoted(pos)?)
            }
            '&' | '|' => {
                scanner.bump();
                if scanner.bump() != Some(ch) {
                    return Err(scanner.error(pos, format!("expected '{ch}{ch}'")));
                }
                if ch == '&' {
                    Token::And
                } else {
                    Token::Or
                }
            }
            '=' => {
                scanner.bump();
                match scanner.bump() {
                    Some('=') => Token::Op(CompareOp::Eq),
                    Some('~') => Token::Op(CompareOp::Match),
                    _ => return Err(scanner.error(pos, "expected '==' or '=~'")),
                }
            }
            '!' => {
                scanner.bump();
                match scanner.peek() {
                    Some('=') => {
                        scanner.bump();
                        Token::Op(CompareOp::Ne)
                    }
                    Some('~') => {
                        scanner.bump();
                        Token::Op(CompareOp::NotMatch)
                    }
                    _ => Token::Not,
                }
            }
            '<' | '>' => {
                scanner.bump();
                let or_equal = scanner.peek() == Some('=');
                if or_equal {
                    scanner.bump();
                }
                Token::Op(match (ch, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                })
            }
            '-' | '0'..='9' => {
                let mut number_str = String::new();
                if ch == '-' {
                    number_str.push('-');
                    scanner.bump();
                }
                while let Some(digit) = scanner.peek().filter(|c| c.is_ascii_digit()) {
                    number_str.push(digit);
                    scanner.bump();
                }
                let number = number_str
                    .parse::<i64>()
                    .map_err(|_| scanner.error(pos, format!("invalid number '{number_str}'")))?;
                Token::Number(number)
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                if ch == 'r' {
                    let mut lookahead = scanner.chars.clone();
                    lookahead.next();
                    if matches!(lookahead.peek(), Some((_, '"'))) {
                        scanner.bump();
                        tokens.push(Spanned {
                            token: Token::Regex(scanner.raw_quoted(pos)?),
                            pos,
                        });
                        continue;
                    }
                }

                let mut identifier = String::new();
                while let Some(c) = scanner
                    .peek()
                    .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                {
                    identifier.push(c);
                    scanner.bump();
                }

                match identifier.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Identifier(identifier),
                }
            }
            _ => {
                return Err(scanner.error(pos, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

/// Recursive descent parser for policy expressions.
pub(crate) struct ExpressionParser<'a> {
    source: &'a str,
    tokens: &'a [Spanned],
    position: usize,
}

impl<'a> ExpressionParser<'a> {
    pub(crate) fn new(source: &'a str, tokens: &'a [Spanned]) -> Self {
        Self {
            source,
            tokens,
            position: 0,
        }
    }

    fn current_token(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn peek_token(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.position + ahead).map(|s| &s.token)
    }

    fn current_position(&self) -> Position {
        match self.tokens.get(self.position) {
            Some(spanned) => spanned.pos,
            None => {
                let last = self.source.lines().count().max(1);
                let column = self.source.lines().last().map_or(0, |l| l.chars().count()) + 1;
                Position {
                    line: last,
                    column,
                    offset: self.source.len(),
                }
            }
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.current_token().cloned();
        self.position += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> PolicyError {
        syntax_error(self.source, self.current_position(), message)
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    /// Parse OR expressions (lowest precedence).
    pub(crate) fn parse_or_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expression()?;

        while let Some(Token::Or) = self.current_token() {
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expr::or(left, right);
        }

        Ok(left)
    }

    /// Parse AND expressions.
    fn parse_and_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_not_expression()?;

        while let Some(Token::And) = self.current_token() {
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expr::and(left, right);
        }

        Ok(left)
    }

    /// Parse NOT expressions.
    fn parse_not_expression(&mut self) -> Result<Expr> {
        if let Some(Token::Not) = self.current_token() {
            self.advance();
            let operand = self.parse_not_expression()?;
            Ok(Expr::not(operand))
        } else {
            self.parse_comparison()
        }
    }

    /// Parse an operand optionally followed by a comparison operator.
    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_operand()?;
        let pos = self.current_position();

        let op = match (self.current_token(), self.peek_token(1)) {
            (Some(Token::Op(op)), _) => {
                let op = *op;
                self.advance();
                op
            }
            (Some(Token::In), _) => {
                self.advance();
                CompareOp::In
            }
            (Some(Token::Not), Some(Token::In)) => {
                self.advance();
                self.advance();
                CompareOp::NotIn
            }
            _ => return Ok(lhs),
        };

        let mut rhs = self.parse_operand()?;
        if matches!(op, CompareOp::In | CompareOp::NotIn) {
            if let Expr::Primary(Primary::Ident { name, pos }) = rhs {
                rhs = Expr::Array(Array::Ident { name, pos });
            }
        }

        Ok(Expr::Compare {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            pos,
        })
    }

    /// Parse parenthesized expressions, arrays and primaries.
    fn parse_operand(&mut self) -> Result<Expr> {
        let pos = self.current_position();
        match self.current_token() {
            Some(Token::LeftParen) => {
                self.advance();
                let expr = self.parse_or_expression()?;
                if let Some(Token::RightParen) = self.current_token() {
                    self.advance();
                    Ok(expr)
                } else {
                    Err(self.error("expected closing parenthesis"))
                }
            }
            Some(Token::LeftBracket) => {
                self.advance();
                Ok(Expr::Array(Array::Items(self.parse_array_items()?)))
            }
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::Primary(Primary::Ident { name, pos }))
            }
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::Primary(Primary::Str(s)))
            }
            Some(Token::Pattern(p)) => {
                let p = p.clone();
                self.advance();
                Ok(Expr::Primary(Primary::Pattern(p)))
            }
            Some(Token::Regex(r)) => {
                let r = r.clone();
                self.advance();
                Ok(Expr::Primary(Primary::Regex(r)))
            }
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(Expr::Primary(Primary::Int(n)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Primary(Primary::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Primary(Primary::Bool(false)))
            }
            None => Err(self.error("unexpected end of expression")),
            Some(other) => {
                let message = format!("unexpected token {other:?}");
                Err(self.error(message))
            }
        }
    }

    fn parse_array_items(&mut self) -> Result<Vec<ArrayItem>> {
        let mut items = Vec::new();
        loop {
            let item = match self.advance() {
                Some(Token::RightBracket) if items.is_empty() => return Ok(items),
                Some(Token::Str(s)) => ArrayItem::Str(s),
                Some(Token::Pattern(p)) => ArrayItem::Pattern(p),
                Some(Token::Regex(r)) => ArrayItem::Regex(r),
                Some(Token::Number(n)) => ArrayItem::Int(n),
                _ => {
                    self.position -= 1;
                    return Err(self.error("expected a literal in array"));
                }
            };
            items.push(item);

            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RightBracket) => return Ok(items),
                _ => {
                    self.position -= 1;
                    return Err(self.error("expected ',' or ']' in array"));
                }
            }
        }
    }
}

fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(syntax_error(source, Position::default(), "empty expression"));
    }

    let mut parser = ExpressionParser::new(source, &tokens);
    let expr = parser.parse_or_expression()?;
    if !parser.is_at_end() {
        return Err(parser.error("unexpected trailing tokens"));
    }
    Ok(expr)
}

/// Parse a rule expression.
pub fn parse_rule(source: &str) -> Result<RuleAst> {
    Ok(RuleAst {
        expr: parse_expression(source)?,
        source: source.to_string(),
    })
}

/// Parse a macro expression; bare lists and literals are kept as such.
pub fn parse_macro(source: &str) -> Result<MacroAst> {
    Ok(match parse_expression(source)? {
        Expr::Array(array) => MacroAst::Array(array),
        Expr::Primary(primary @ Primary::Ident { .. }) => {
            MacroAst::Expression(Expr::Primary(primary))
        }
        Expr::Primary(primary) => MacroAst::Primary(primary),
        expr => MacroAst::Expression(expr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        let toks = tokens(r#"process.name == "bash""#);
        assert_eq!(
            toks,
            vec![
                Token::Identifier("process.name".to_string()),
                Token::Op(CompareOp::Eq),
                Token::Str("bash".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_boolean_operators() {
        let toks = tokens("a && b || !c and d or not e");
        assert_eq!(toks.len(), 11);
        assert_eq!(toks[1], Token::And);
        assert_eq!(toks[3], Token::Or);
        assert_eq!(toks[4], Token::Not);
        assert_eq!(toks[6], Token::And);
        assert_eq!(toks[8], Token::Or);
        assert_eq!(toks[9], Token::Not);
    }

    #[test]
    fn test_tokenize_literals() {
        let toks = tokens(r#"~"/bin/*" r"^a\d+$" -42 true false"#);
        assert_eq!(
            toks,
            vec![
                Token::Pattern("/bin/*".to_string()),
                Token::Regex(r"^a\d+$".to_string()),
                Token::Number(-42),
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let toks = tokens("a != 1 && b <= 2 && c >= 3 && d < 4 && e > 5 && f =~ g && h !~ i");
        let ops: Vec<_> = toks
            .into_iter()
            .filter_map(|t| match t {
                Token::Op(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                CompareOp::Ne,
                CompareOp::Le,
                CompareOp::Ge,
                CompareOp::Lt,
                CompareOp::Gt,
                CompareOp::Match,
                CompareOp::NotMatch,
            ]
        );
    }

    #[test]
    fn test_identifier_starting_with_r() {
        let toks = tokens("rename.file.path");
        assert_eq!(toks, vec![Token::Identifier("rename.file.path".to_string())]);
    }

    #[test]
    fn test_tokenize_invalid_character() {
        let err = tokenize("a @ b").unwrap_err();
        match err {
            PolicyError::Syntax {
                position, message, ..
            } => {
                assert_eq!(position.column, 3);
                assert!(message.contains("unexpected character"));
            }
            _ => panic!("Expected Syntax error"),
        }
    }

    #[test]
    fn test_tokenize_unterminated_string() {
        let err = tokenize(r#"a == "abc"#).unwrap_err();
        assert!(err.to_string().contains("unterminated string literal"));
    }

    #[test]
    fn test_parse_precedence() {
        // a || b && c parses as a || (b && c)
        let ast = parse_rule("a || b && c").unwrap();
        match ast.expr {
            Expr::Or(_, rhs) => assert!(matches!(*rhs, Expr::And(_, _))),
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_parentheses() {
        let ast = parse_rule("(a || b) && c").unwrap();
        match ast.expr {
            Expr::And(lhs, _) => assert!(matches!(*lhs, Expr::Or(_, _))),
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_in_array() {
        let ast = parse_rule(r#"process.name in ["sh", ~"*bash", r"^z.*"]"#).unwrap();
        match ast.expr {
            Expr::Compare { op, rhs, .. } => {
                assert_eq!(op, CompareOp::In);
                assert_eq!(
                    *rhs,
                    Expr::Array(Array::Items(vec![
                        ArrayItem::Str("sh".to_string()),
                        ArrayItem::Pattern("*bash".to_string()),
                        ArrayItem::Regex("^z.*".to_string()),
                    ]))
                );
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_not_in_macro() {
        let ast = parse_rule("process.name not in shells").unwrap();
        match ast.expr {
            Expr::Compare { op, rhs, .. } => {
                assert_eq!(op, CompareOp::NotIn);
                assert!(matches!(
                    *rhs,
                    Expr::Array(Array::Ident { ref name, .. }) if name == "shells"
                ));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_closing_parenthesis() {
        let err = parse_rule("(a && b").unwrap_err();
        assert!(err.to_string().contains("expected closing parenthesis"));
    }

    #[test]
    fn test_parse_trailing_tokens() {
        let err = parse_rule("a b").unwrap_err();
        match err {
            PolicyError::Syntax { position, .. } => assert_eq!(position.column, 3),
            _ => panic!("Expected Syntax error"),
        }
    }

    #[test]
    fn test_parse_empty_expression() {
        let err = parse_rule("   ").unwrap_err();
        assert!(err.to_string().contains("empty expression"));
    }

    #[test]
    fn test_parse_dangling_operator() {
        let err = parse_rule("process.name ==").unwrap_err();
        assert!(err.to_string().contains("unexpected end of expression"));
    }

    #[test]
    fn test_parse_macro_kinds() {
        assert!(matches!(
            parse_macro(r#"["a", "b"]"#).unwrap(),
            MacroAst::Array(Array::Items(_))
        ));
        assert!(matches!(
            parse_macro("42").unwrap(),
            MacroAst::Primary(Primary::Int(42))
        ));
        assert!(matches!(
            parse_macro(r#"process.name == "a""#).unwrap(),
            MacroAst::Expression(_)
        ));
        assert!(matches!(
            parse_macro("other_macro").unwrap(),
            MacroAst::Expression(Expr::Primary(_))
        ));
    }

    #[test]
    fn test_parse_bad_array() {
        let err = parse_rule("a in [1, ]").unwrap_err();
        assert!(err.to_string().contains("expected a literal in array"));
        let err = parse_rule("a in [1 2]").unwrap_err();
        assert!(err.to_string().contains("expected ',' or ']' in array"));
    }
}
