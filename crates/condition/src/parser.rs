//! Recursive-descent parser for the condition surface syntax.
//!
//! ```text
//! or        := and (("||" | OR) and)*
//! and       := unary (("&&" | AND) unary)*
//! unary     := ("!" | NOT) unary | "(" or ")" | predicate
//! predicate := operand (cmp operand | IN list)?
//!            | func "(" args ")"
//! operand   := string | number | true | false | null | path
//! path      := ident ("." ident | "[" (index | string) "]")*
//!            | "$" ("." ident | "[" (index | string) "]")*
//!            | "/" location
//! ```
//!
//! A bare path means `defined(path)`; bare `true` and `false` are the
//! constant conditions.

use structpatch_pointer::{Path, PathPart};
use structpatch_value::Value;

use crate::error::ConditionError;
use crate::types::{CmpOp, Condition, StringOp, TypeKind};

const FRAGMENT_LEN: usize = 16;

/// Parses a condition.
pub fn parse_condition(input: &str) -> Result<Condition, ConditionError> {
    ConditionParser::parse(input)
}

/// Parses a single path expression (`A.B[0]`, `$`, or `/A/B`).
pub fn parse_path_expr(input: &str) -> Result<Path, ConditionError> {
    let mut parser = ConditionParser { input, pos: 0 };
    parser.skip_whitespace();
    let path = parser.parse_path()?;
    parser.skip_whitespace();
    if !parser.is_at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(path)
}

impl Condition {
    pub fn parse(input: &str) -> Result<Condition, ConditionError> {
        parse_condition(input)
    }
}

enum Operand {
    Path(Path),
    Literal(Value),
}

pub struct ConditionParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ConditionParser<'a> {
    pub fn parse(input: &'a str) -> Result<Condition, ConditionError> {
        let mut parser = Self { input, pos: 0 };
        parser.skip_whitespace();
        if parser.is_at_end() {
            return Err(parser.error("empty condition"));
        }
        let cond = parser.parse_or()?;
        parser.skip_whitespace();
        if !parser.is_at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(cond)
    }

    // ── Logical layers ───────────────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut items = vec![self.parse_and()?];
        loop {
            self.skip_whitespace();
            if self.peek_str("||") {
                self.advance_by(2);
            } else if self.peek_keyword("OR") {
                self.advance_by(2);
            } else {
                break;
            }
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Condition::Or(items) })
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut items = vec![self.parse_unary()?];
        loop {
            self.skip_whitespace();
            if self.peek_str("&&") {
                self.advance_by(2);
            } else if self.peek_keyword("AND") {
                self.advance_by(3);
            } else {
                break;
            }
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Condition::And(items) })
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionError> {
        self.skip_whitespace();

        if self.peek() == Some('!') && !self.peek_str("!=") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if self.peek_keyword("NOT") {
            self.advance_by(3);
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if self.peek() == Some('(') {
            self.advance();
            let inner = self.parse_or()?;
            self.skip_whitespace();
            self.expect(')')?;
            return Ok(inner);
        }

        self.parse_predicate()
    }

    // ── Predicates ───────────────────────────────────────────────────────

    fn parse_predicate(&mut self) -> Result<Condition, ConditionError> {
        if let Some(name) = self.peek_function() {
            return self.parse_function(&name);
        }

        let start = self.pos;
        let left = self.parse_operand()?;
        self.skip_whitespace();

        if let Some((op, len)) = self.peek_comparison_operator() {
            self.advance_by(len);
            self.skip_whitespace();
            let right = self.parse_operand()?;
            return match (left, right) {
                (Operand::Path(path), Operand::Literal(value)) => {
                    Ok(Condition::Compare { path, op, value, fold_case: false })
                }
                (Operand::Literal(value), Operand::Path(path)) => {
                    Ok(Condition::Compare { path, op: op.reversed(), value, fold_case: false })
                }
                (Operand::Path(left), Operand::Path(right)) => {
                    Ok(Condition::CompareFields { left, op, right, fold_case: false })
                }
                (Operand::Literal(_), Operand::Literal(_)) => {
                    Err(self.error_at(start, "comparison needs at least one path"))
                }
            };
        }

        if self.peek_keyword("in") {
            let Operand::Path(path) = left else {
                return Err(self.error_at(start, "membership needs a path"));
            };
            self.advance_by(2);
            self.skip_whitespace();
            let values = self.parse_list()?;
            return Ok(Condition::In { path, values, fold_case: false });
        }

        match left {
            Operand::Path(path) => Ok(Condition::Defined { path }),
            Operand::Literal(Value::Bool(true)) => Ok(Condition::always()),
            Operand::Literal(Value::Bool(false)) => Ok(Condition::never()),
            Operand::Literal(_) => Err(self.error_at(start, "literal is not a condition")),
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<Condition, ConditionError> {
        let start = self.pos;
        self.advance_by(name.len());
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();

        let cond = match name {
            "defined" => Condition::Defined { path: self.parse_path()? },
            "undefined" => Condition::Undefined { path: self.parse_path()? },
            "type" => {
                let path = self.parse_path()?;
                self.expect_comma()?;
                let at = self.pos;
                let kind = TypeKind::from_str(&self.parse_string()?)
                    .map_err(|_| self.error_at(at, "unknown type name"))?;
                Condition::TypeOf { path, kind }
            }
            "in" => {
                let path = self.parse_path()?;
                self.expect_comma()?;
                let values = self.parse_list()?;
                let fold_case = self.parse_optional_flag()?;
                Condition::In { path, values, fold_case }
            }
            "log" => Condition::Log { message: self.parse_string()? },
            other => {
                let Some(op) = StringOp::from_name(other) else {
                    return Err(self.error_at(start, "unknown function"));
                };
                let path = self.parse_path()?;
                self.expect_comma()?;
                let needle = self.parse_string()?;
                let fold_case = self.parse_optional_flag()?;
                Condition::StringPred { path, op, needle, fold_case }
            }
        };

        self.skip_whitespace();
        self.expect(')')?;
        Ok(cond)
    }

    fn parse_optional_flag(&mut self) -> Result<bool, ConditionError> {
        self.skip_whitespace();
        if self.peek() != Some(',') {
            return Ok(false);
        }
        self.advance();
        self.skip_whitespace();
        let at = self.pos;
        match self.parse_operand()? {
            Operand::Literal(Value::Bool(b)) => Ok(b),
            _ => Err(self.error_at(at, "expected true or false")),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Value>, ConditionError> {
        self.expect('[')?;
        let mut values = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.advance();
            return Ok(values);
        }
        loop {
            self.skip_whitespace();
            let at = self.pos;
            match self.parse_operand()? {
                Operand::Literal(v) => values.push(v),
                Operand::Path(_) => return Err(self.error_at(at, "expected a literal")),
            }
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.advance(),
                Some(']') => {
                    self.advance();
                    return Ok(values);
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    // ── Operands ─────────────────────────────────────────────────────────

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('"') | Some('\'') => Ok(Operand::Literal(Value::String(self.parse_string()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => Ok(Operand::Literal(self.parse_number()?)),
            Some(_) if self.peek_keyword("true") => {
                self.advance_by(4);
                Ok(Operand::Literal(Value::Bool(true)))
            }
            Some(_) if self.peek_keyword("false") => {
                self.advance_by(5);
                Ok(Operand::Literal(Value::Bool(false)))
            }
            Some(_) if self.peek_keyword("null") => {
                self.advance_by(4);
                Ok(Operand::Literal(Value::Null))
            }
            Some(_) => Ok(Operand::Path(self.parse_path()?)),
        }
    }

    fn parse_path(&mut self) -> Result<Path, ConditionError> {
        match self.peek() {
            Some('/') => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || "()=!<>,&|[]".contains(c) {
                        break;
                    }
                    self.advance();
                }
                Ok(structpatch_pointer::parse(&self.input[start..self.pos]))
            }
            Some('$') => {
                self.advance();
                let mut parts = Vec::new();
                self.parse_path_tail(&mut parts)?;
                Ok(Path::from_parts(parts))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut parts = vec![PathPart::canonical(&self.parse_identifier()?)];
                self.parse_path_tail(&mut parts)?;
                Ok(Path::from_parts(parts))
            }
            _ => Err(self.error("expected a path")),
        }
    }

    fn parse_path_tail(&mut self, parts: &mut Vec<PathPart>) -> Result<(), ConditionError> {
        loop {
            match self.peek() {
                Some('.') => {
                    self.advance();
                    parts.push(PathPart::canonical(&self.parse_identifier()?));
                }
                Some('[') => {
                    self.advance();
                    self.skip_whitespace();
                    match self.peek() {
                        Some('"') | Some('\'') => parts.push(PathPart::Key(self.parse_string()?)),
                        Some(c) if c.is_ascii_digit() => {
                            let start = self.pos;
                            while matches!(self.peek(), Some('0'..='9')) {
                                self.advance();
                            }
                            let index = self.input[start..self.pos]
                                .parse()
                                .map_err(|_| self.error_at(start, "invalid index"))?;
                            parts.push(PathPart::Index(index));
                        }
                        _ => return Err(self.error("expected an index or a quoted key")),
                    }
                    self.skip_whitespace();
                    self.expect(']')?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ConditionError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => self.advance(),
            _ => return Err(self.error("expected an identifier")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_string(&mut self) -> Result<String, ConditionError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a string")),
        };
        let start = self.pos;
        self.advance();

        let mut result = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error_at(start, "unclosed string")),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('\\') => result.push('\\'),
                        Some('\'') => result.push('\''),
                        Some('"') => result.push('"'),
                        _ => return Err(self.error("invalid escape sequence")),
                    }
                    self.advance();
                }
                Some(c) => {
                    result.push(c);
                    self.advance();
                }
            }
        }
        Ok(result)
    }

    fn parse_number(&mut self) -> Result<Value, ConditionError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        if !matches!(self.peek(), Some('0'..='9')) {
            return Err(self.error_at(start, "invalid number"));
        }
        while matches!(self.peek(), Some('0'..='9')) {
            self.advance();
        }
        let mut float = false;
        if self.peek() == Some('.') {
            float = true;
            self.advance();
            if !matches!(self.peek(), Some('0'..='9')) {
                return Err(self.error_at(start, "invalid number"));
            }
            while matches!(self.peek(), Some('0'..='9')) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            float = true;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if !matches!(self.peek(), Some('0'..='9')) {
                return Err(self.error_at(start, "invalid number"));
            }
            while matches!(self.peek(), Some('0'..='9')) {
                self.advance();
            }
        }

        let text = &self.input[start..self.pos];
        if !float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            if let Ok(u) = text.parse::<u64>() {
                return Ok(Value::Uint(u));
            }
        }
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| self.error_at(start, "invalid number"))
    }

    // ── Lexing helpers ───────────────────────────────────────────────────

    fn peek_comparison_operator(&self) -> Option<(CmpOp, usize)> {
        if self.peek_str("==") {
            Some((CmpOp::Eq, 2))
        } else if self.peek_str("!=") {
            Some((CmpOp::Ne, 2))
        } else if self.peek_str("<=") {
            Some((CmpOp::Le, 2))
        } else if self.peek_str(">=") {
            Some((CmpOp::Ge, 2))
        } else if self.peek_str("<") {
            Some((CmpOp::Lt, 1))
        } else if self.peek_str(">") {
            Some((CmpOp::Gt, 1))
        } else {
            None
        }
    }

    /// A function name directly followed (modulo whitespace) by `(`.
    fn peek_function(&self) -> Option<String> {
        const NAMES: [&str; 9] =
            ["defined", "undefined", "type", "contains", "starts", "ends", "matches", "in", "log"];
        let name = NAMES.iter().find(|n| self.peek_keyword(n))?;
        let rest = self.input[self.pos + name.len()..].trim_start();
        rest.starts_with('(').then(|| name.to_string())
    }

    /// `word` at the cursor, not followed by an identifier character.
    fn peek_keyword(&self, word: &str) -> bool {
        if !self.peek_str(word) {
            return false;
        }
        !self.input[self.pos + word.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn expect(&mut self, expected: char) -> Result<(), ConditionError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn expect_comma(&mut self) -> Result<(), ConditionError> {
        self.skip_whitespace();
        self.expect(',')?;
        self.skip_whitespace();
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: &str) -> ConditionError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, position: usize, message: &str) -> ConditionError {
        let fragment: String = self.input[position..].chars().take(FRAGMENT_LEN).collect();
        ConditionError::Parse { message: message.to_string(), fragment, position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_pointer::parse;

    #[test]
    fn comparison_with_literal_on_the_left_is_swapped() {
        let c = parse_condition("5 < Count").unwrap();
        assert_eq!(
            c,
            Condition::Compare { path: parse("/Count"), op: CmpOp::Gt, value: Value::Int(5), fold_case: false }
        );
    }

    #[test]
    fn paths_in_all_forms() {
        assert_eq!(parse_path_expr("A.B[0][\"x y\"]").unwrap(), parse("/A/B/0/x y"));
        assert_eq!(parse_path_expr("/A/B~1c").unwrap(), parse("/A/B~1c"));
        assert_eq!(parse_path_expr("$").unwrap(), Path::root());
        assert_eq!(parse_path_expr("$[2].x").unwrap(), parse("/2/x"));
    }

    #[test]
    fn keywords_need_word_boundaries() {
        let c = parse_condition("ORDER == 1 OR ANDY").unwrap();
        assert_eq!(
            c,
            Condition::Or(vec![
                Condition::Compare { path: parse("/ORDER"), op: CmpOp::Eq, value: Value::Int(1), fold_case: false },
                Condition::Defined { path: parse("/ANDY") },
            ])
        );
    }

    #[test]
    fn errors_carry_fragment_and_position() {
        let err = parse_condition("A == 1 B").unwrap_err();
        assert_eq!(
            err,
            ConditionError::Parse { message: "unexpected trailing input".into(), fragment: "B".into(), position: 7 }
        );
        assert!(matches!(parse_condition("1 == 2"), Err(ConditionError::Parse { position: 0, .. })));
        assert!(matches!(parse_condition("contains(A)"), Err(ConditionError::Parse { .. })));
        assert!(matches!(parse_condition("\"open"), Err(ConditionError::Parse { .. })));
        assert!(matches!(parse_condition(""), Err(ConditionError::Parse { .. })));
    }
}
