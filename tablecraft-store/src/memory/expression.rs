//! Condition and update expression evaluation for the simulated store.
//!
//! Supports the subset the rest of the workspace emits:
//! `attribute_exists`, `attribute_not_exists`, `begins_with`, comparisons,
//! `BETWEEN`, `AND`/`OR`/`NOT` with parentheses, and `SET`/`REMOVE` update
//! clauses with `+`/`-` and `if_not_exists`. Paths are top-level attribute
//! names.

use crate::error::{TransportError, TransportResult};
use std::cmp::Ordering;
use tablecraft_types::{AttributeValue, Expression, Item, Number};

/// Maximum nesting depth for condition expressions.
const MAX_EXPRESSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Path(String),
    Value(String),
    Word(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn invalid(message: impl Into<String>) -> TransportError {
    TransportError::validation(format!("invalid expression: {}", message.into()))
}

fn tokenize(input: &str) -> TransportResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    while i < len {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '=' => tokens.push(Token::Cmp(CmpOp::Eq)),
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('<', Some('>')) => CmpOp::Ne,
                    ('<', Some('=')) => CmpOp::Le,
                    ('>', Some('=')) => CmpOp::Ge,
                    ('<', _) => CmpOp::Lt,
                    _ => CmpOp::Gt,
                };
                if matches!(op, CmpOp::Ne | CmpOp::Le | CmpOp::Ge) {
                    i += 1;
                }
                tokens.push(Token::Cmp(op));
            }
            '#' | ':' => {
                let start = i + 1;
                let mut end = start;
                while end < len && is_word(chars[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(invalid(format!("empty placeholder at offset {i}")));
                }
                let name: String = chars[i..end].iter().collect();
                tokens.push(if c == '#' { Token::Path(name) } else { Token::Value(name) });
                i = end;
                continue;
            }
            c if is_word(c) => {
                let start = i;
                while i < len && is_word(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
                continue;
            }
            other => return Err(invalid(format!("unexpected character `{other}`"))),
        }
        i += 1;
    }
    Ok(tokens)
}

/// A value position in an expression, resolved against the placeholder maps.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attribute(String),
    Literal(AttributeValue),
}

impl Operand {
    fn resolve<'a>(&'a self, item: &'a Item) -> Option<&'a AttributeValue> {
        match self {
            Self::Attribute(name) => item.get(name),
            Self::Literal(value) => Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Exists(String),
    NotExists(String),
    BeginsWith(Operand, Operand),
    Compare(Operand, CmpOp, Operand),
    Between(Operand, Operand, Operand),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

struct Parser<'e> {
    tokens: Vec<Token>,
    pos: usize,
    expression: &'e Expression,
}

impl<'e> Parser<'e> {
    fn new(expression: &'e Expression) -> TransportResult<Self> {
        Ok(Self {
            tokens: tokenize(&expression.text)?,
            pos: 0,
            expression,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn expect(&mut self, expected: Token) -> TransportResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(invalid(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn attribute_name(&self, placeholder: &str) -> TransportResult<String> {
        self.expression
            .names
            .get(placeholder)
            .cloned()
            .ok_or_else(|| invalid(format!("unbound name placeholder `{placeholder}`")))
    }

    fn path(&mut self) -> TransportResult<String> {
        match self.next() {
            Some(Token::Path(placeholder)) => self.attribute_name(&placeholder),
            Some(Token::Word(name)) => Ok(name),
            other => Err(invalid(format!("expected an attribute, found {other:?}"))),
        }
    }

    fn operand(&mut self) -> TransportResult<Operand> {
        match self.next() {
            Some(Token::Path(placeholder)) => Ok(Operand::Attribute(self.attribute_name(&placeholder)?)),
            Some(Token::Value(placeholder)) => self
                .expression
                .values
                .get(&placeholder)
                .cloned()
                .map(Operand::Literal)
                .ok_or_else(|| invalid(format!("unbound value placeholder `{placeholder}`"))),
            Some(Token::Word(name)) => Ok(Operand::Attribute(name)),
            other => Err(invalid(format!("expected an operand, found {other:?}"))),
        }
    }

    fn condition(&mut self, depth: usize) -> TransportResult<Condition> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(invalid(format!("nesting exceeds {MAX_EXPRESSION_DEPTH} levels")));
        }
        let mut left = self.conjunction(depth)?;
        while self.peek_word("OR") {
            self.pos += 1;
            let right = self.conjunction(depth)?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn conjunction(&mut self, depth: usize) -> TransportResult<Condition> {
        let mut left = self.negation(depth)?;
        while self.peek_word("AND") {
            self.pos += 1;
            let right = self.negation(depth)?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn negation(&mut self, depth: usize) -> TransportResult<Condition> {
        if self.peek_word("NOT") {
            self.pos += 1;
            return Ok(Condition::Not(Box::new(self.negation(depth + 1)?)));
        }
        self.primary(depth)
    }

    fn primary(&mut self, depth: usize) -> TransportResult<Condition> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.condition(depth + 1)?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let function = match (self.peek(), self.tokens.get(self.pos + 1)) {
            (Some(Token::Word(name)), Some(Token::LParen)) => Some(name.to_ascii_lowercase()),
            _ => None,
        };
        if let Some(function) = function {
            self.pos += 2;
            let condition = match function.as_str() {
                "attribute_exists" => Condition::Exists(self.path()?),
                "attribute_not_exists" => Condition::NotExists(self.path()?),
                "begins_with" => {
                    let subject = self.operand()?;
                    self.expect(Token::Comma)?;
                    Condition::BeginsWith(subject, self.operand()?)
                }
                other => return Err(invalid(format!("unsupported function `{other}`"))),
            };
            self.expect(Token::RParen)?;
            return Ok(condition);
        }

        let left = self.operand()?;
        if self.peek_word("BETWEEN") {
            self.pos += 1;
            let low = self.operand()?;
            if !self.peek_word("AND") {
                return Err(invalid("BETWEEN needs AND"));
            }
            self.pos += 1;
            let high = self.operand()?;
            return Ok(Condition::Between(left, low, high));
        }
        match self.next() {
            Some(Token::Cmp(op)) => Ok(Condition::Compare(left, op, self.operand()?)),
            other => Err(invalid(format!("expected a comparison, found {other:?}"))),
        }
    }
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => Some(a.cmp(b)),
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl Condition {
    fn eval(&self, item: &Item) -> bool {
        match self {
            Self::Exists(name) => item.contains_key(name),
            Self::NotExists(name) => !item.contains_key(name),
            Self::BeginsWith(subject, prefix) => match (subject.resolve(item), prefix.resolve(item)) {
                (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => s.starts_with(p.as_str()),
                (Some(AttributeValue::B(s)), Some(AttributeValue::B(p))) => s.starts_with(p),
                _ => false,
            },
            Self::Compare(left, op, right) => {
                let (l, r) = (left.resolve(item), right.resolve(item));
                // a missing operand fails every comparison, `<>` included
                let (Some(l), Some(r)) = (l, r) else {
                    return false;
                };
                match op {
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                    ordering => {
                        let Some(found) = compare(l, r) else {
                            return false;
                        };
                        match ordering {
                            CmpOp::Lt => found == Ordering::Less,
                            CmpOp::Le => found != Ordering::Greater,
                            CmpOp::Gt => found == Ordering::Greater,
                            _ => found != Ordering::Less,
                        }
                    }
                }
            }
            Self::Between(subject, low, high) => {
                let Some(value) = subject.resolve(item) else {
                    return false;
                };
                let above = low
                    .resolve(item)
                    .and_then(|low| compare(value, low))
                    .is_some_and(|o| o != Ordering::Less);
                let below = high
                    .resolve(item)
                    .and_then(|high| compare(value, high))
                    .is_some_and(|o| o != Ordering::Greater);
                above && below
            }
            Self::And(a, b) => a.eval(item) && b.eval(item),
            Self::Or(a, b) => a.eval(item) || b.eval(item),
            Self::Not(inner) => !inner.eval(item),
        }
    }
}

/// Evaluates a condition or filter expression against `item`. A missing
/// item is evaluated as an empty one.
pub(crate) fn evaluate(expression: &Expression, item: Option<&Item>) -> TransportResult<bool> {
    let mut parser = Parser::new(expression)?;
    let condition = parser.condition(0)?;
    if !parser.at_end() {
        return Err(invalid(format!("trailing input in `{}`", expression.text)));
    }
    let empty = Item::new();
    Ok(condition.eval(item.unwrap_or(&empty)))
}

#[derive(Debug, Clone, PartialEq)]
enum SetValue {
    Operand(Operand),
    Add(Operand, Operand),
    Subtract(Operand, Operand),
    IfNotExists(String, Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum UpdateAction {
    Set(String, SetValue),
    Remove(String),
}

fn parse_update(expression: &Expression) -> TransportResult<Vec<UpdateAction>> {
    let mut parser = Parser::new(expression)?;
    let mut actions = Vec::new();
    while !parser.at_end() {
        let clause = match parser.next() {
            Some(Token::Word(word)) => word.to_ascii_uppercase(),
            other => return Err(invalid(format!("expected SET or REMOVE, found {other:?}"))),
        };
        loop {
            match clause.as_str() {
                "SET" => {
                    let target = parser.path()?;
                    parser.expect(Token::Cmp(CmpOp::Eq))?;
                    let value = set_value(&mut parser)?;
                    actions.push(UpdateAction::Set(target, value));
                }
                "REMOVE" => actions.push(UpdateAction::Remove(parser.path()?)),
                other => return Err(invalid(format!("unsupported update clause `{other}`"))),
            }
            if parser.peek() == Some(&Token::Comma) {
                parser.pos += 1;
            } else {
                break;
            }
        }
    }
    if actions.is_empty() {
        return Err(invalid("empty update expression"));
    }
    Ok(actions)
}

fn set_value(parser: &mut Parser<'_>) -> TransportResult<SetValue> {
    let is_if_not_exists = matches!(
        (parser.peek(), parser.tokens.get(parser.pos + 1)),
        (Some(Token::Word(w)), Some(Token::LParen)) if w.eq_ignore_ascii_case("if_not_exists")
    );
    let first = if is_if_not_exists {
        parser.pos += 2;
        let path = parser.path()?;
        parser.expect(Token::Comma)?;
        let fallback = parser.operand()?;
        parser.expect(Token::RParen)?;
        SetValue::IfNotExists(path, fallback)
    } else {
        SetValue::Operand(parser.operand()?)
    };
    let arithmetic = match parser.peek() {
        Some(Token::Plus) => Some(true),
        Some(Token::Minus) => Some(false),
        _ => None,
    };
    let Some(add) = arithmetic else {
        return Ok(first);
    };
    parser.pos += 1;
    let SetValue::Operand(left) = first else {
        return Err(invalid("arithmetic on if_not_exists is not supported"));
    };
    let right = parser.operand()?;
    Ok(if add {
        SetValue::Add(left, right)
    } else {
        SetValue::Subtract(left, right)
    })
}

fn number_of(operand: &Operand, item: &Item) -> TransportResult<Number> {
    match operand.resolve(item) {
        Some(AttributeValue::N(n)) => Ok(n.clone()),
        other => Err(invalid(format!("arithmetic needs numbers, found {other:?}"))),
    }
}

/// Applies an update expression to `item` in place. Key attributes may not
/// be changed.
pub(crate) fn apply_update(
    expression: &Expression,
    item: &mut Item,
    key_attributes: &[&str],
) -> TransportResult<()> {
    let actions = parse_update(expression)?;
    let snapshot = item.clone();
    for action in actions {
        let target = match &action {
            UpdateAction::Set(target, _) | UpdateAction::Remove(target) => target.clone(),
        };
        if key_attributes.contains(&target.as_str()) {
            return Err(TransportError::validation(format!(
                "cannot update key attribute `{target}`"
            )));
        }
        match action {
            UpdateAction::Remove(name) => {
                item.remove(&name);
            }
            UpdateAction::Set(name, value) => {
                let resolved = match value {
                    SetValue::Operand(operand) => operand
                        .resolve(&snapshot)
                        .cloned()
                        .ok_or_else(|| invalid(format!("operand for `{name}` is missing")))?,
                    SetValue::IfNotExists(path, fallback) => snapshot
                        .get(&path)
                        .or_else(|| fallback.resolve(&snapshot))
                        .cloned()
                        .ok_or_else(|| invalid(format!("operand for `{name}` is missing")))?,
                    SetValue::Add(a, b) => {
                        let sum = number_of(&a, &snapshot)?.as_decimal() + number_of(&b, &snapshot)?.as_decimal();
                        AttributeValue::N(Number::from(sum))
                    }
                    SetValue::Subtract(a, b) => {
                        let difference = number_of(&a, &snapshot)?.as_decimal() - number_of(&b, &snapshot)?.as_decimal();
                        AttributeValue::N(Number::from(difference))
                    }
                };
                item.insert(name, resolved);
            }
        }
    }
    Ok(())
}
