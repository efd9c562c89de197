// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Arithmetic expressions embedded in decision models.
//!
//! An [`Expression`] keeps its original source text next to the parsed tree.
//! Serialization writes only the source; deserialization parses it again, so
//! a model snapshot can cross a serialization boundary and come back as
//! executable expressions.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ExpressionError;

/// Maximum nesting of parentheses, unary operators and operator chains.
pub const MAX_DEPTH: usize = 256;

/// Variable bindings used when evaluating expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
	values: HashMap<String, f64>,
}

impl Scope {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<f64> {
		self.values.get(name).copied()
	}

	pub fn set(&mut self, name: impl Into<String>, value: f64) {
		self.values.insert(name.into(), value);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.values.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

impl<S: Into<String>> FromIterator<(S, f64)> for Scope {
	fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
		Self {
			values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
	Add,
	Sub,
	Mul,
	Div,
	Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
	Min,
	Max,
	Abs,
	Sqrt,
	Pow,
}

impl Function {
	fn lookup(name: &str) -> Option<Self> {
		match name {
			"min" => Some(Function::Min),
			"max" => Some(Function::Max),
			"abs" => Some(Function::Abs),
			"sqrt" => Some(Function::Sqrt),
			"pow" => Some(Function::Pow),
			_ => None,
		}
	}

	/// `None` means variadic with at least one argument.
	fn arity(&self) -> Option<usize> {
		match self {
			Function::Min | Function::Max => None,
			Function::Abs | Function::Sqrt => Some(1),
			Function::Pow => Some(2),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
	Number(f64),
	Variable(String),
	Negate(Box<Expr>),
	Binary(BinaryOp, Box<Expr>, Box<Expr>),
	Call(Function, Vec<Expr>),
}

/// A parsed arithmetic expression together with its source text.
#[derive(Clone)]
pub struct Expression {
	source: String,
	expr: Expr,
}

impl Expression {
	pub fn parse(source: &str) -> Result<Self, ExpressionError> {
		let tokens = tokenize(source)?;
		let mut parser = Parser {
			tokens,
			pos: 0,
			depth: 0,
		};
		let (expr, _) = parser.parse_sum()?;
		match parser.peek() {
			(Token::End, _) => Ok(Self {
				source: source.trim().to_string(),
				expr,
			}),
			(token, position) => Err(ExpressionError::UnexpectedToken {
				found: token.to_string(),
				position: *position,
			}),
		}
	}

	/// A literal number. Non-finite values have no source form and are rejected.
	pub fn constant(value: f64) -> Result<Self, ExpressionError> {
		if !value.is_finite() {
			return Err(ExpressionError::NotFinite(value.to_string()));
		}
		Ok(Self::number(value))
	}

	pub(crate) fn zero() -> Self {
		Self::number(0.0)
	}

	fn number(value: f64) -> Self {
		Self {
			source: value.to_string(),
			expr: Expr::Number(value),
		}
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	/// Names of all variables referenced by this expression.
	pub fn variables(&self) -> BTreeSet<String> {
		let mut names = BTreeSet::new();
		collect_variables(&self.expr, &mut names);
		names
	}

	pub fn evaluate(&self, scope: &Scope) -> Result<f64, ExpressionError> {
		let value = eval(&self.expr, scope)?;
		if value.is_finite() {
			Ok(value)
		} else {
			Err(ExpressionError::NotFinite(self.source.clone()))
		}
	}
}

impl PartialEq for Expression {
	fn eq(&self, other: &Self) -> bool {
		self.expr == other.expr
	}
}

impl fmt::Debug for Expression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Expression").field(&self.source).finish()
	}
}

impl fmt::Display for Expression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}

impl std::str::FromStr for Expression {
	type Err = ExpressionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Expression::parse(s)
	}
}

impl Serialize for Expression {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.source)
	}
}

impl<'de> Deserialize<'de> for Expression {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Text(String),
			Number(f64),
		}

		match Raw::deserialize(deserializer)? {
			Raw::Text(source) => Expression::parse(&source).map_err(serde::de::Error::custom),
			Raw::Number(value) => Expression::constant(value).map_err(serde::de::Error::custom),
		}
	}
}

fn collect_variables(expr: &Expr, names: &mut BTreeSet<String>) {
	match expr {
		Expr::Number(_) => {}
		Expr::Variable(name) => {
			names.insert(name.clone());
		}
		Expr::Negate(inner) => collect_variables(inner, names),
		Expr::Binary(_, lhs, rhs) => {
			collect_variables(lhs, names);
			collect_variables(rhs, names);
		}
		Expr::Call(_, args) => {
			for arg in args {
				collect_variables(arg, names);
			}
		}
	}
}

fn eval(expr: &Expr, scope: &Scope) -> Result<f64, ExpressionError> {
	match expr {
		Expr::Number(value) => Ok(*value),
		Expr::Variable(name) => scope
			.get(name)
			.ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
		Expr::Negate(inner) => Ok(-eval(inner, scope)?),
		Expr::Binary(op, lhs, rhs) => {
			let lhs = eval(lhs, scope)?;
			let rhs = eval(rhs, scope)?;
			Ok(match op {
				BinaryOp::Add => lhs + rhs,
				BinaryOp::Sub => lhs - rhs,
				BinaryOp::Mul => lhs * rhs,
				BinaryOp::Div => lhs / rhs,
				BinaryOp::Pow => lhs.powf(rhs),
			})
		}
		Expr::Call(function, args) => {
			let values = args
				.iter()
				.map(|arg| eval(arg, scope))
				.collect::<Result<Vec<_>, _>>()?;
			Ok(match function {
				Function::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
				Function::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
				Function::Abs => values[0].abs(),
				Function::Sqrt => values[0].sqrt(),
				Function::Pow => values[0].powf(values[1]),
			})
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Number(f64),
	Ident(String),
	Plus,
	Minus,
	Star,
	Slash,
	Caret,
	LParen,
	RParen,
	Comma,
	End,
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Token::Number(n) => write!(f, "{n}"),
			Token::Ident(name) => f.write_str(name),
			Token::Plus => f.write_str("+"),
			Token::Minus => f.write_str("-"),
			Token::Star => f.write_str("*"),
			Token::Slash => f.write_str("/"),
			Token::Caret => f.write_str("^"),
			Token::LParen => f.write_str("("),
			Token::RParen => f.write_str(")"),
			Token::Comma => f.write_str(","),
			Token::End => f.write_str("<end>"),
		}
	}
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
	let chars: Vec<char> = source.chars().collect();
	let mut tokens = Vec::new();
	let mut i = 0;

	while i < chars.len() {
		let ch = chars[i];
		let start = i;
		let token = match ch {
			c if c.is_whitespace() => {
				i += 1;
				continue;
			}
			'+' => Token::Plus,
			'-' => Token::Minus,
			'*' => Token::Star,
			'/' => Token::Slash,
			'^' => Token::Caret,
			'(' => Token::LParen,
			')' => Token::RParen,
			',' => Token::Comma,
			c if c.is_ascii_digit() || c == '.' => {
				while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
					i += 1;
				}
				if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
					let mut j = i + 1;
					if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
						j += 1;
					}
					if j < chars.len() && chars[j].is_ascii_digit() {
						i = j;
						while i < chars.len() && chars[i].is_ascii_digit() {
							i += 1;
						}
					}
				}
				let literal: String = chars[start..i].iter().collect();
				let value = literal
					.parse::<f64>()
					.map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
				tokens.push((Token::Number(value), start));
				continue;
			}
			c if c.is_alphabetic() || c == '_' => {
				while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
					i += 1;
				}
				tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
				continue;
			}
			other => {
				return Err(ExpressionError::UnexpectedCharacter {
					ch: other,
					position: start,
				})
			}
		};
		tokens.push((token, start));
		i += 1;
	}

	tokens.push((Token::End, chars.len()));
	Ok(tokens)
}

struct Parser {
	tokens: Vec<(Token, usize)>,
	pos: usize,
	depth: usize,
}

/// A parsed subtree and its height.
type Parsed = (Expr, usize);

impl Parser {
	fn peek(&self) -> (&Token, &usize) {
		let (token, position) = &self.tokens[self.pos.min(self.tokens.len() - 1)];
		(token, position)
	}

	fn advance(&mut self) -> Token {
		let token = self.peek().0.clone();
		if self.pos < self.tokens.len() - 1 {
			self.pos += 1;
		}
		token
	}

	fn unexpected(&self) -> ExpressionError {
		match self.peek() {
			(Token::End, _) => ExpressionError::UnexpectedEnd,
			(token, position) => ExpressionError::UnexpectedToken {
				found: token.to_string(),
				position: *position,
			},
		}
	}

	fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
		if *self.peek().0 == expected {
			self.advance();
			Ok(())
		} else {
			Err(self.unexpected())
		}
	}

	// Evaluation and drop recurse over the tree, so its height is bounded too.
	fn node(&self, expr: Expr, height: usize) -> Result<Parsed, ExpressionError> {
		if height > MAX_DEPTH {
			return Err(ExpressionError::TooDeep { limit: MAX_DEPTH });
		}
		Ok((expr, height))
	}

	fn binary(&self, op: BinaryOp, lhs: Parsed, rhs: Parsed) -> Result<Parsed, ExpressionError> {
		let height = lhs.1.max(rhs.1) + 1;
		self.node(Expr::Binary(op, Box::new(lhs.0), Box::new(rhs.0)), height)
	}

	fn parse_sum(&mut self) -> Result<Parsed, ExpressionError> {
		let mut lhs = self.parse_product()?;
		loop {
			let op = match self.peek().0 {
				Token::Plus => BinaryOp::Add,
				Token::Minus => BinaryOp::Sub,
				_ => return Ok(lhs),
			};
			self.advance();
			let rhs = self.parse_product()?;
			lhs = self.binary(op, lhs, rhs)?;
		}
	}

	fn parse_product(&mut self) -> Result<Parsed, ExpressionError> {
		let mut lhs = self.parse_unary()?;
		loop {
			let op = match self.peek().0 {
				Token::Star => BinaryOp::Mul,
				Token::Slash => BinaryOp::Div,
				_ => return Ok(lhs),
			};
			self.advance();
			let rhs = self.parse_unary()?;
			lhs = self.binary(op, lhs, rhs)?;
		}
	}

	// Every recursive path of the grammar passes through here.
	fn parse_unary(&mut self) -> Result<Parsed, ExpressionError> {
		if self.depth >= MAX_DEPTH {
			return Err(ExpressionError::TooDeep { limit: MAX_DEPTH });
		}
		self.depth += 1;
		let parsed = self.parse_signed();
		self.depth -= 1;
		parsed
	}

	fn parse_signed(&mut self) -> Result<Parsed, ExpressionError> {
		match self.peek().0 {
			Token::Minus => {
				self.advance();
				match self.parse_unary()? {
					// A negative literal is stored as one number, as `constant` does.
					(Expr::Number(value), height) => Ok((Expr::Number(-value), height)),
					(inner, height) => self.node(Expr::Negate(Box::new(inner)), height + 1),
				}
			}
			Token::Plus => {
				self.advance();
				self.parse_unary()
			}
			_ => self.parse_power(),
		}
	}

	// Right associative, binds tighter than unary minus on its left.
	fn parse_power(&mut self) -> Result<Parsed, ExpressionError> {
		let base = self.parse_primary()?;
		if *self.peek().0 == Token::Caret {
			self.advance();
			let exponent = self.parse_unary()?;
			return self.binary(BinaryOp::Pow, base, exponent);
		}
		Ok(base)
	}

	fn parse_primary(&mut self) -> Result<Parsed, ExpressionError> {
		match self.peek().0.clone() {
			Token::Number(value) => {
				self.advance();
				Ok((Expr::Number(value), 1))
			}
			Token::Ident(name) => {
				self.advance();
				if *self.peek().0 != Token::LParen {
					return Ok((Expr::Variable(name), 1));
				}
				let function = Function::lookup(&name)
					.ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
				self.advance();
				let (args, height) = self.parse_arguments()?;
				let arity_ok = match function.arity() {
					Some(expected) => args.len() == expected,
					None => !args.is_empty(),
				};
				if !arity_ok {
					return Err(ExpressionError::Arity {
						function: name,
						expected: function.arity().unwrap_or(1),
						found: args.len(),
					});
				}
				self.node(Expr::Call(function, args), height + 1)
			}
			Token::LParen => {
				self.advance();
				let inner = self.parse_sum()?;
				self.expect(Token::RParen)?;
				Ok(inner)
			}
			_ => Err(self.unexpected()),
		}
	}

	/// Arguments of a call and the height of the tallest one.
	fn parse_arguments(&mut self) -> Result<(Vec<Expr>, usize), ExpressionError> {
		let mut args = Vec::new();
		let mut height = 0;
		if *self.peek().0 == Token::RParen {
			self.advance();
			return Ok((args, height));
		}
		loop {
			let (arg, arg_height) = self.parse_sum()?;
			args.push(arg);
			height = height.max(arg_height);
			match self.peek().0 {
				Token::Comma => {
					self.advance();
				}
				Token::RParen => {
					self.advance();
					return Ok((args, height));
				}
				_ => return Err(self.unexpected()),
			}
		}
	}
}
