//! Boolean filter expressions over scalar fields.
//!
//! The parser turns an expression string into a [`FilterExpr`] tree, which is
//! then checked against a collection schema and evaluated row by row into a
//! `RoaringBitmap` of row offsets.
//!
//! Grammar:
//!
//! ```text
//! expr       := or
//! or         := and (("or" | "||") and)*
//! and        := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | "(" expr ")" | predicate
//! predicate  := field op literal | field ["not"] "in" "[" literal, ... "]"
//! op         := "==" | "!=" | ">" | ">=" | "<" | "<="
//! literal    := integer | float | "string" | 'string' | true | false
//! ```
//!
//! The empty expression matches every row.

use std::cmp::Ordering;
use std::fmt;

use roaring::RoaringBitmap;

use tidal_core::{CollectionSchema, CoreError, CoreResult, DataType, FieldValue, PrimaryKey, RowRecord};

/// Maximum recursion depth allowed while parsing filter expressions.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Upper bound on the number of values in an `in` list.
const MAX_IN_LIST: usize = 16_384;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Literal values appearing in expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl Literal {
    /// Orders a stored value against this literal; `None` when incomparable.
    fn compare(&self, value: &FieldValue) -> Option<Ordering> {
        match (value, self) {
            (FieldValue::Int64(v), Literal::Int(l)) => Some(v.cmp(l)),
            (FieldValue::Int64(v), Literal::Float(l)) => (*v as f64).partial_cmp(l),
            (FieldValue::Double(v), Literal::Int(l)) => v.partial_cmp(&(*l as f64)),
            (FieldValue::Double(v), Literal::Float(l)) => v.partial_cmp(l),
            (FieldValue::VarChar(v), Literal::Str(l)) => Some(v.as_str().cmp(l.as_str())),
            (FieldValue::Bool(v), Literal::Bool(l)) => Some(v.cmp(l)),
            _ => None,
        }
    }

    fn to_primary_key(&self) -> Option<PrimaryKey> {
        match self {
            Literal::Int(v) => Some(PrimaryKey::Int64(*v)),
            Literal::Str(v) => Some(PrimaryKey::VarChar(v.clone())),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => "integer",
            Literal::Float(_) => "float",
            Literal::Str(_) => "string",
            Literal::Bool(_) => "bool",
        }
    }
}

/// Abstract syntax tree of a parsed filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Matches every row (the empty expression).
    All,
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
}

impl FilterExpr {
    /// Parses an expression with the default depth limit.
    pub fn parse(input: &str) -> CoreResult<Self> {
        FilterParser::new(MAX_FILTER_DEPTH).parse(input)
    }

    /// True for the match-everything expression.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Checks field names and literal types against a schema.
    pub fn check(&self, schema: &CollectionSchema) -> CoreResult<()> {
        match self {
            Self::All => Ok(()),
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(|c| c.check(schema))
            }
            Self::Not(inner) => inner.check(schema),
            Self::Compare { field, value, .. } => check_literal(schema, field, value),
            Self::In { field, values, .. } => values
                .iter()
                .try_for_each(|value| check_literal(schema, field, value)),
        }
    }

    /// Evaluates the expression against one row.
    ///
    /// Missing or null fields satisfy no predicate, negated ones included:
    /// `a != 1`, `a not in [1]` and `not (a == 1)` all reject a null `a`.
    #[must_use]
    pub fn matches(&self, row: &RowRecord) -> bool {
        self.evaluate(row) == Some(true)
    }

    /// Three-valued evaluation; `None` means unknown because a compared
    /// field is null, missing or of an incomparable type.
    fn evaluate(&self, row: &RowRecord) -> Option<bool> {
        match self {
            Self::All => Some(true),
            Self::And(children) => {
                let mut unknown = false;
                for child in children {
                    match child.evaluate(row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                (!unknown).then_some(true)
            }
            Self::Or(children) => {
                let mut unknown = false;
                for child in children {
                    match child.evaluate(row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                (!unknown).then_some(false)
            }
            Self::Not(inner) => inner.evaluate(row).map(|b| !b),
            Self::Compare { field, op, value } => row
                .get(field)
                .and_then(|v| value.compare(v))
                .map(|ordering| op.holds(ordering)),
            Self::In {
                field,
                values,
                negated,
            } => match row.get(field) {
                None | Some(FieldValue::Null) => None,
                Some(v) => {
                    let found = values
                        .iter()
                        .any(|l| l.compare(v) == Some(Ordering::Equal));
                    Some(found != *negated)
                }
            },
        }
    }

    /// Offsets among `candidates` whose rows match.
    #[must_use]
    pub fn filter_offsets(&self, rows: &[RowRecord], candidates: &RoaringBitmap) -> RoaringBitmap {
        if self.is_all() {
            return candidates.clone();
        }
        candidates
            .iter()
            .filter(|offset| {
                rows.get(*offset as usize)
                    .map_or(false, |row| self.matches(row))
            })
            .collect()
    }

    /// Resolves the expression to an explicit key set when it only constrains
    /// the primary key with `==` or `in` (possibly OR-ed together).
    #[must_use]
    pub fn primary_keys(&self, pk_field: &str) -> Option<Vec<PrimaryKey>> {
        match self {
            Self::Compare {
                field,
                op: CompareOp::Eq,
                value,
            } if field == pk_field => value.to_primary_key().map(|pk| vec![pk]),
            Self::In {
                field,
                values,
                negated: false,
            } if field == pk_field => values.iter().map(Literal::to_primary_key).collect(),
            Self::Or(children) => {
                let mut keys = Vec::new();
                for child in children {
                    keys.extend(child.primary_keys(pk_field)?);
                }
                Some(keys)
            }
            _ => None,
        }
    }
}

fn check_literal(schema: &CollectionSchema, field: &str, value: &Literal) -> CoreResult<()> {
    let schema_field = schema.field(field).ok_or_else(|| {
        CoreError::schema_violation(field, "filter references a field not in the schema")
    })?;
    let ok = match (&schema_field.data_type, value) {
        (DataType::Int64 | DataType::Double, Literal::Int(_) | Literal::Float(_)) => true,
        (DataType::VarChar { .. }, Literal::Str(_)) => true,
        (DataType::Bool, Literal::Bool(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::schema_violation(
            field,
            format!(
                "cannot compare {:?} field with {} literal {}",
                schema_field.data_type,
                value.type_name(),
                value
            ),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Lit(Literal),
    Op(CompareOp),
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn syntax_error(message: impl Into<String>) -> CoreError {
    CoreError::schema_violation("<filter>", message)
}

fn tokenize(input: &str) -> CoreResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Op(CompareOp::Eq), 2),
                    ('!', Some('=')) => (Token::Op(CompareOp::Ne), 2),
                    ('>', Some('=')) => (Token::Op(CompareOp::Ge), 2),
                    ('<', Some('=')) => (Token::Op(CompareOp::Le), 2),
                    ('>', _) => (Token::Op(CompareOp::Gt), 1),
                    ('<', _) => (Token::Op(CompareOp::Lt), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => return Err(syntax_error(format!("unexpected `=` at position {i}; use `==`"))),
                };
                tokens.push(token);
                i += width;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(syntax_error(format!("unexpected `{c}` at position {i}")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        None => return Err(syntax_error("unterminated string literal")),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Lit(Literal::Str(value)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                let mut is_float = false;
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        i += 1;
                    } else if matches!(ch, '.' | 'e' | 'E')
                        || (matches!(ch, '+' | '-') && matches!(chars[i - 1], 'e' | 'E'))
                    {
                        is_float = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let literal = if is_float {
                    text.parse::<f64>()
                        .map(Literal::Float)
                        .map_err(|_| syntax_error(format!("invalid number `{text}`")))?
                } else {
                    text.parse::<i64>()
                        .map(Literal::Int)
                        .map_err(|_| syntax_error(format!("invalid integer `{text}`")))?
                };
                tokens.push(Token::Lit(literal));
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = i;
                while chars
                    .get(i)
                    .map_or(false, |ch| *ch == '_' || ch.is_ascii_alphanumeric())
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::Lit(Literal::Bool(true)),
                    "false" => Token::Lit(Literal::Bool(false)),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(syntax_error(format!(
                    "unexpected character `{other}` at position {i}"
                )))
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser with a nesting limit.
pub struct FilterParser {
    max_depth: usize,
    tokens: Vec<Token>,
    pos: usize,
}

impl FilterParser {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            tokens: Vec::new(),
            pos: 0,
        }
    }

    /// Parses an expression string into a [`FilterExpr`].
    pub fn parse(mut self, input: &str) -> CoreResult<FilterExpr> {
        if input.trim().is_empty() {
            return Ok(FilterExpr::All);
        }
        self.tokens = tokenize(input)?;
        self.pos = 0;
        let expr = self.parse_or(0)?;
        if let Some(token) = self.peek() {
            return Err(syntax_error(format!("unexpected trailing token {token:?}")));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> CoreResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(syntax_error(format!(
                "expected {expected:?}, found {token:?}"
            ))),
            None => Err(syntax_error(format!(
                "expected {expected:?}, found end of expression"
            ))),
        }
    }

    fn check_depth(&self, depth: usize) -> CoreResult<()> {
        if depth > self.max_depth {
            return Err(syntax_error(format!(
                "filter nesting exceeds maximum depth of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn parse_or(&mut self, depth: usize) -> CoreResult<FilterExpr> {
        let mut children = vec![self.parse_and(depth)?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            children.push(self.parse_and(depth)?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            FilterExpr::Or(children)
        })
    }

    fn parse_and(&mut self, depth: usize) -> CoreResult<FilterExpr> {
        let mut children = vec![self.parse_unary(depth)?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            children.push(self.parse_unary(depth)?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            FilterExpr::And(children)
        })
    }

    fn parse_unary(&mut self, depth: usize) -> CoreResult<FilterExpr> {
        self.check_depth(depth)?;
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(FilterExpr::Not(Box::new(self.parse_unary(depth + 1)?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or(depth + 1)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => self.parse_predicate(),
        }
    }

    fn parse_predicate(&mut self) -> CoreResult<FilterExpr> {
        let field = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(token) => {
                return Err(syntax_error(format!(
                    "expected field name, found {token:?}"
                )))
            }
            None => return Err(syntax_error("expected field name, found end of expression")),
        };

        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(FilterExpr::Compare { field, op, value })
            }
            Some(Token::In) => Ok(FilterExpr::In {
                field,
                values: self.parse_list()?,
                negated: false,
            }),
            Some(Token::Not) => {
                self.expect(Token::In)?;
                Ok(FilterExpr::In {
                    field,
                    values: self.parse_list()?,
                    negated: true,
                })
            }
            Some(token) => Err(syntax_error(format!(
                "expected operator after `{field}`, found {token:?}"
            ))),
            None => Err(syntax_error(format!(
                "expected operator after `{field}`, found end of expression"
            ))),
        }
    }

    fn parse_literal(&mut self) -> CoreResult<Literal> {
        match self.next() {
            Some(Token::Lit(literal)) => Ok(literal),
            Some(token) => Err(syntax_error(format!("expected literal, found {token:?}"))),
            None => Err(syntax_error("expected literal, found end of expression")),
        }
    }

    fn parse_list(&mut self) -> CoreResult<Vec<Literal>> {
        self.expect(Token::LBracket)?;
        let mut values = Vec::new();
        if self.peek() == Some(&Token::RBracket) {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if values.len() > MAX_IN_LIST {
                return Err(syntax_error(format!(
                    "`in` list exceeds maximum of {MAX_IN_LIST} entries"
                )));
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => return Ok(values),
                Some(token) => {
                    return Err(syntax_error(format!(
                        "expected `,` or `]` in list, found {token:?}"
                    )))
                }
                None => return Err(syntax_error("unterminated `in` list")),
            }
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => Ok(()),
            Self::And(children) | Self::Or(children) => {
                let sep = if matches!(self, Self::And(_)) { " and " } else { " or " };
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::Compare { field, op, value } => write!(f, "{field} {} {value}", op.as_str()),
            Self::In {
                field,
                values,
                negated,
            } => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                let op = if *negated { "not in" } else { "in" };
                write!(f, "{field} {op} [{}]", values.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tidal_core::{FieldSchema, Timestamp};

    fn row(pk: i64, age: i64, name: &str) -> RowRecord {
        RowRecord {
            pk: PrimaryKey::from(pk),
            timestamp: Timestamp::from_raw(1),
            fields: BTreeMap::from([
                ("pk".to_string(), FieldValue::Int64(pk)),
                ("age".to_string(), FieldValue::Int64(age)),
                ("name".to_string(), FieldValue::from(name)),
            ]),
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            FieldSchema::int64_primary_key("pk", false),
            FieldSchema::new("age", DataType::Int64),
            FieldSchema::new("name", DataType::VarChar { max_length: 32 }),
            FieldSchema::float_vector("vec", 2),
        ])
    }

    #[test]
    fn test_empty_expression_matches_everything() {
        let expr = FilterExpr::parse("   ").unwrap();
        assert!(expr.is_all());
        assert!(expr.matches(&row(1, 2, "a")));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let expr = FilterExpr::parse("age > 10 or name == 'bob' and pk < 0").unwrap();
        // `and` binds tighter than `or`
        assert!(expr.matches(&row(1, 11, "alice")));
        assert!(!expr.matches(&row(1, 5, "bob")));

        let expr = FilterExpr::parse("(age > 10 or name == \"bob\") and pk > 0").unwrap();
        assert!(expr.matches(&row(1, 5, "bob")));
    }

    #[test]
    fn test_in_and_not_in() {
        let expr = FilterExpr::parse("pk in [1, 2, 3]").unwrap();
        assert!(expr.matches(&row(2, 0, "")));
        assert!(!expr.matches(&row(4, 0, "")));

        let expr = FilterExpr::parse("pk not in [1,2]").unwrap();
        assert!(!expr.matches(&row(2, 0, "")));
        assert!(expr.matches(&row(4, 0, "")));
    }

    #[test]
    fn test_not_and_symbolic_operators() {
        let expr = FilterExpr::parse("!(age >= 18) && name != 'x' || pk == -1").unwrap();
        assert!(expr.matches(&row(1, 17, "y")));
        assert!(!expr.matches(&row(1, 18, "y")));
        assert!(expr.matches(&row(-1, 30, "x")));
    }

    #[test]
    fn test_numeric_comparisons_cross_types() {
        let expr = FilterExpr::parse("age <= 10.5").unwrap();
        assert!(expr.matches(&row(1, 10, "")));
        assert!(!expr.matches(&row(1, 11, "")));
    }

    #[test]
    fn test_missing_field_matches_nothing() {
        let expr = FilterExpr::parse("score > 1").unwrap();
        assert!(!expr.matches(&row(1, 1, "")));
    }

    #[test]
    fn test_null_rejects_negated_predicates_alike() {
        let mut nulled = row(1, 1, "");
        nulled.fields.insert("age".to_string(), FieldValue::Null);
        for expr in [
            "age == 1",
            "age != 1",
            "age in [1]",
            "age not in [1]",
            "not (age == 1)",
            "not (age in [1])",
            "not (age != 1)",
            "not (age == 1 and pk == 1)",
            "score != 1",
            "not (score in [2])",
        ] {
            let parsed = FilterExpr::parse(expr).unwrap();
            assert!(!parsed.matches(&nulled), "{expr} matched a null field");
        }

        // A known-true branch still decides an `or`
        let expr = FilterExpr::parse("not (age == 1) or pk == 1").unwrap();
        assert!(expr.matches(&nulled));
        let expr = FilterExpr::parse("not (age == 1 and pk == 2)").unwrap();
        assert!(expr.matches(&nulled));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["pk =", "pk = 1", "pk in 1", "(pk > 1", "pk > 1 pk", "pk > 'a", "and", "pk >"] {
            assert!(FilterExpr::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_depth_limit() {
        let nested = format!("{}pk > 0{}", "(".repeat(40), ")".repeat(40));
        assert!(FilterExpr::parse(&nested).is_err());
        let shallow = format!("{}pk > 0{}", "(".repeat(5), ")".repeat(5));
        assert!(FilterExpr::parse(&shallow).is_ok());
    }

    #[test]
    fn test_check_against_schema() {
        let schema = schema();
        assert!(FilterExpr::parse("age > 1 and name in ['a']")
            .unwrap()
            .check(&schema)
            .is_ok());
        assert!(FilterExpr::parse("missing > 1").unwrap().check(&schema).is_err());
        assert!(FilterExpr::parse("name > 1").unwrap().check(&schema).is_err());
        assert!(FilterExpr::parse("vec == 1").unwrap().check(&schema).is_err());
    }

    #[test]
    fn test_primary_key_resolution() {
        let expr = FilterExpr::parse("pk in [1, 2]").unwrap();
        assert_eq!(
            expr.primary_keys("pk"),
            Some(vec![PrimaryKey::from(1), PrimaryKey::from(2)])
        );
        let expr = FilterExpr::parse("pk == 5 or pk == 6").unwrap();
        assert_eq!(expr.primary_keys("pk").map(|k| k.len()), Some(2));
        assert!(FilterExpr::parse("pk > 5").unwrap().primary_keys("pk").is_none());
        assert!(FilterExpr::parse("pk == 1 or age == 2")
            .unwrap()
            .primary_keys("pk")
            .is_none());
    }

    #[test]
    fn test_filter_offsets() {
        let rows = vec![row(1, 5, "a"), row(2, 15, "b"), row(3, 25, "c")];
        let all: RoaringBitmap = (0..3).collect();
        let expr = FilterExpr::parse("age > 10").unwrap();
        let matched = expr.filter_offsets(&rows, &all);
        assert_eq!(matched.iter().collect::<Vec<_>>(), vec![1, 2]);
    }
}
