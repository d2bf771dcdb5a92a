//! Parameter values and the formula evaluator for time-driven uniforms.
//!
//! The grammar is deliberately small: numbers, the frame variables
//! (`t`/`time` in elapsed seconds, `frame` as the frame index), the four
//! arithmetic operators, unary minus and parentheses. Parse results are
//! cached by source string so steady-state frames never re-parse.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parameter value as stored on a node instance.
///
/// Untagged on the wire: a bare number/bool/array is a literal, an
/// `{"expr": "..."}` object is a formula. A plain string is not a valid
/// parameter, so a formula can never be confused with literal data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Expression(ExpressionSource),
    Literal(LiteralValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Number(f64),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Vec4([f64; 4]),
}

/// A formula string, kept distinct from literal strings by its wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpressionSource {
    pub expr: String,
}

impl ExpressionSource {
    pub fn new(expr: impl Into<String>) -> Self {
        ExpressionSource { expr: expr.into() }
    }
}

/// Frame-clock values exposed to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameContext {
    /// Elapsed seconds since playback start.
    pub time: f64,
    /// Monotonic frame index.
    pub frame: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("expression produced a non-finite value")]
    NonFinite,
}

// ── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Time,
    Frame,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, ctx: &FrameContext) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Time => ctx.time,
            Expr::Frame => ctx.frame as f64,
            Expr::Neg(e) => -e.eval(ctx),
            Expr::Add(a, b) => a.eval(ctx) + b.eval(ctx),
            Expr::Sub(a, b) => a.eval(ctx) - b.eval(ctx),
            Expr::Mul(a, b) => a.eval(ctx) * b.eval(ctx),
            Expr::Div(a, b) => a.eval(ctx) / b.eval(ctx),
        }
    }
}

// ── Parser ──────────────────────────────────────────────────────────────────

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.bump('+');
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.parse_term()?));
                }
                Some('-') => {
                    self.bump('-');
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.parse_term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.bump('*');
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.parse_unary()?));
                }
                Some('/') => {
                    self.bump('/');
                    lhs = Expr::Div(Box::new(lhs), Box::new(self.parse_unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some('-') {
            self.bump('-');
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some('(') => {
                self.bump('(');
                let inner = self.parse_expr()?;
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.bump(')');
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_variable(),
            Some(c) => Err(self.error(format!("unexpected character {c:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_number(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_ws();
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.') {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let value: f64 = text.parse().map_err(|_| ExpressionError::Parse {
            offset: start,
            message: format!("invalid number {text:?}"),
        })?;
        Ok(Expr::Number(value))
    }

    fn parse_variable(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_ws();
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len()
            && (bytes[self.pos].is_ascii_alphanumeric() || bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            "t" | "time" => Ok(Expr::Time),
            "frame" => Ok(Expr::Frame),
            other => Err(ExpressionError::UnknownVariable(other.to_string())),
        }
    }
}

fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(src);
    let expr = parser.parse_expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(expr)
}

// ── Cache ───────────────────────────────────────────────────────────────────

/// Memoised parse results keyed by the raw formula string.
///
/// Failures are cached too, so a broken formula costs one parse rather than
/// one per frame. Entries not evaluated during the previous frame are
/// evicted at the next [`begin_frame`](Self::begin_frame), so edited-away
/// formulas do not accumulate over a session.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    parsed: HashMap<String, CacheEntry>,
    generation: u64,
}

#[derive(Debug)]
struct CacheEntry {
    parsed: Result<Expr, ExpressionError>,
    last_used: u64,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a frame boundary and drop entries no formula referenced during
    /// the previous frame.
    pub fn begin_frame(&mut self) {
        self.generation += 1;
        let cutoff = self.generation - 1;
        self.parsed.retain(|_, entry| entry.last_used >= cutoff);
    }

    pub fn evaluate(
        &mut self,
        source: &ExpressionSource,
        ctx: &FrameContext,
    ) -> Result<f64, ExpressionError> {
        let generation = self.generation;
        let entry = self
            .parsed
            .entry(source.expr.clone())
            .or_insert_with(|| CacheEntry {
                parsed: parse(&source.expr),
                last_used: generation,
            });
        entry.last_used = generation;
        let expr = entry.parsed.as_ref().map_err(|e| e.clone())?;
        let value = expr.eval(ctx);
        if !value.is_finite() {
            return Err(ExpressionError::NonFinite);
        }
        Ok(value)
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.parsed.len()
    }
}

/// Resolve a parameter to its literal value for one frame.
///
/// Literal values pass through untouched. Expressions evaluate to a scalar
/// number; the caller decides how a scalar maps onto a vector slot.
pub fn resolve_parameter(
    value: &ParameterValue,
    ctx: &FrameContext,
    cache: &mut ExpressionCache,
) -> Result<LiteralValue, ExpressionError> {
    match value {
        ParameterValue::Literal(lit) => Ok(lit.clone()),
        ParameterValue::Expression(src) => cache.evaluate(src, ctx).map(LiteralValue::Number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, ctx: FrameContext) -> Result<f64, ExpressionError> {
        let mut cache = ExpressionCache::new();
        cache.evaluate(&ExpressionSource::new(src), &ctx)
    }

    fn at_time(time: f64) -> FrameContext {
        FrameContext { time, frame: 0 }
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3", at_time(0.0)).unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3", at_time(0.0)).unwrap(), 9.0);
        assert_eq!(eval("10 - 4 - 3", at_time(0.0)).unwrap(), 3.0);
        assert_eq!(eval("8 / 2 / 2", at_time(0.0)).unwrap(), 2.0);
        assert_eq!(eval("-2 * -3", at_time(0.0)).unwrap(), 6.0);
        assert_eq!(eval("0.5 + .25", at_time(0.0)).unwrap(), 0.75);
    }

    #[test]
    fn frame_variables() {
        assert_eq!(eval("t * 2", at_time(1.5)).unwrap(), 3.0);
        assert_eq!(eval("time * 2", at_time(1.5)).unwrap(), 3.0);
        let ctx = FrameContext { time: 0.0, frame: 24 };
        assert_eq!(eval("frame / 24", ctx).unwrap(), 1.0);
    }

    #[test]
    fn rejects_unknown_variables_and_garbage() {
        assert_eq!(
            eval("x + 1", at_time(0.0)),
            Err(ExpressionError::UnknownVariable("x".to_string()))
        );
        assert!(matches!(eval("1 +", at_time(0.0)), Err(ExpressionError::Parse { .. })));
        assert!(matches!(eval("(1", at_time(0.0)), Err(ExpressionError::Parse { .. })));
        assert!(matches!(eval("1 2", at_time(0.0)), Err(ExpressionError::Parse { .. })));
        assert!(matches!(
            eval("sin(t)", at_time(0.0)),
            Err(ExpressionError::UnknownVariable(_))
        ));
    }

    #[test]
    fn division_by_zero_is_non_finite() {
        assert_eq!(eval("1 / 0", at_time(0.0)), Err(ExpressionError::NonFinite));
        assert_eq!(eval("0 / 0", at_time(0.0)), Err(ExpressionError::NonFinite));
    }

    #[test]
    fn cache_parses_each_source_once() {
        let mut cache = ExpressionCache::new();
        let src = ExpressionSource::new("t * 2");
        assert_eq!(cache.evaluate(&src, &at_time(1.0)).unwrap(), 2.0);
        assert_eq!(cache.evaluate(&src, &at_time(2.0)).unwrap(), 4.0);
        assert_eq!(cache.cached_len(), 1);

        let bad = ExpressionSource::new("t +");
        assert!(cache.evaluate(&bad, &at_time(0.0)).is_err());
        assert!(cache.evaluate(&bad, &at_time(1.0)).is_err());
        assert_eq!(cache.cached_len(), 2);
    }

    #[test]
    fn edited_away_formulas_are_evicted_at_frame_boundaries() {
        let mut cache = ExpressionCache::new();
        let old = ExpressionSource::new("t * 2");
        let new = ExpressionSource::new("t * 3");

        cache.evaluate(&old, &at_time(0.0)).unwrap();
        assert_eq!(cache.cached_len(), 1);

        // The user replaces the formula; the old string stops being evaluated.
        cache.begin_frame();
        cache.evaluate(&new, &at_time(1.0)).unwrap();
        assert_eq!(cache.cached_len(), 2);

        cache.begin_frame();
        cache.evaluate(&new, &at_time(2.0)).unwrap();
        cache.begin_frame();
        assert_eq!(cache.cached_len(), 1);

        // The survivor is still served from cache.
        assert_eq!(cache.evaluate(&new, &at_time(4.0)).unwrap(), 12.0);
    }

    #[test]
    fn parameter_values_deserialize_untagged() {
        let v: ParameterValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(v, ParameterValue::Literal(LiteralValue::Number(0.5)));

        let v: ParameterValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ParameterValue::Literal(LiteralValue::Bool(true)));

        let v: ParameterValue = serde_json::from_str("[1.0, 0.0]").unwrap();
        assert_eq!(v, ParameterValue::Literal(LiteralValue::Vec2([1.0, 0.0])));

        let v: ParameterValue = serde_json::from_str(r#"{"expr": "t * 2"}"#).unwrap();
        assert_eq!(v, ParameterValue::Expression(ExpressionSource::new("t * 2")));
    }

    #[test]
    fn literal_parameters_pass_through() {
        let mut cache = ExpressionCache::new();
        let lit = ParameterValue::Literal(LiteralValue::Vec2([0.25, 0.75]));
        let out = resolve_parameter(&lit, &at_time(5.0), &mut cache).unwrap();
        assert_eq!(out, LiteralValue::Vec2([0.25, 0.75]));
    }
}
