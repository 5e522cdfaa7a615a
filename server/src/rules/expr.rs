//! Rule expression compiler and evaluator.
//!
//! String rules like `auth.uid === $uid` compile into a small AST evaluated
//! against a fixed environment: `auth` (the requesting identity or null),
//! `now` (epoch millis), and the path variables captured by `$var` segments
//! while walking the rule tree. The grammar is closed — literals, member
//! access, comparisons, boolean connectives, parentheses — so rule text can
//! never reach a dynamic code execution facility. Identifiers associated
//! with one are rejected at compile time.

use logos::Logos;
use serde_json::Value;

use crate::auth::account::AuthCtx;
use crate::prelude::*;

/// Maximum parser/evaluator recursion depth
const MAX_DEPTH: usize = 32;

/// Identifiers refused at compile time
const FORBIDDEN_IDENTS: [&str; 8] = [
	"require",
	"import",
	"eval",
	"Function",
	"constructor",
	"prototype",
	"__proto__",
	"globalThis",
];

// Lexer //
//*******//

fn unescape(s: &str) -> String {
	let mut result = String::with_capacity(s.len());
	let mut chars = s.chars();
	while let Some(ch) = chars.next() {
		if ch == '\\' {
			match chars.next() {
				Some('n') => result.push('\n'),
				Some('t') => result.push('\t'),
				Some(other) => result.push(other),
				None => {}
			}
		} else {
			result.push(ch);
		}
	}
	result
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
	#[token("===")]
	#[token("==")]
	Eq,
	#[token("!==")]
	#[token("!=")]
	Ne,
	#[token("<=")]
	Le,
	#[token(">=")]
	Ge,
	#[token("<")]
	Lt,
	#[token(">")]
	Gt,

	#[token("&&")]
	And,
	#[token("||")]
	Or,
	#[token("!")]
	Bang,

	#[token("(")]
	LParen,
	#[token(")")]
	RParen,
	#[token(".")]
	Dot,

	#[token("true")]
	True,
	#[token("false")]
	False,
	#[token("null")]
	Null,

	#[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
	PathVar(String),

	#[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
	Ident(String),

	#[regex(r#"'([^'\\]|\\.)*'"#, |lex| { let s = lex.slice(); unescape(&s[1..s.len()-1]) })]
	#[regex(r#""([^"\\]|\\.)*""#, |lex| { let s = lex.slice(); unescape(&s[1..s.len()-1]) })]
	Str(String),

	#[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
	Number(f64),
}

// AST //
//*****//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

#[derive(Debug, Clone)]
pub enum Expr {
	Null,
	Bool(bool),
	Number(f64),
	Str(Box<str>),
	/// `$var` path variable
	Var(Box<str>),
	/// `auth`, `now`, `auth.uid`, …
	Member(Vec<Box<str>>),
	Not(Box<Expr>),
	Cmp(CmpOp, Box<Expr>, Box<Expr>),
	And(Box<Expr>, Box<Expr>),
	Or(Box<Expr>, Box<Expr>),
}

/// A compiled rule expression; keeps the source for diagnostics
#[derive(Debug, Clone)]
pub struct CompiledExpr {
	pub source: Box<str>,
	expr: Expr,
}

// Parser //
//********//

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
}

fn compile_err(source: &str, message: &str) -> Error {
	Error::ValidationError(format!("cannot compile rule '{}': {}", source, message))
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		if token.is_some() {
			self.pos += 1;
		}
		token
	}

	fn parse_expr(&mut self, depth: usize) -> Result<Expr, String> {
		self.parse_or(depth)
	}

	fn parse_or(&mut self, depth: usize) -> Result<Expr, String> {
		if depth > MAX_DEPTH {
			return Err("expression too deeply nested".into());
		}
		let mut left = self.parse_and(depth + 1)?;
		while self.peek() == Some(&Token::Or) {
			self.next();
			let right = self.parse_and(depth + 1)?;
			left = Expr::Or(Box::new(left), Box::new(right));
		}
		Ok(left)
	}

	fn parse_and(&mut self, depth: usize) -> Result<Expr, String> {
		let mut left = self.parse_cmp(depth + 1)?;
		while self.peek() == Some(&Token::And) {
			self.next();
			let right = self.parse_cmp(depth + 1)?;
			left = Expr::And(Box::new(left), Box::new(right));
		}
		Ok(left)
	}

	fn parse_cmp(&mut self, depth: usize) -> Result<Expr, String> {
		let left = self.parse_unary(depth + 1)?;
		let op = match self.peek() {
			Some(Token::Eq) => CmpOp::Eq,
			Some(Token::Ne) => CmpOp::Ne,
			Some(Token::Lt) => CmpOp::Lt,
			Some(Token::Le) => CmpOp::Le,
			Some(Token::Gt) => CmpOp::Gt,
			Some(Token::Ge) => CmpOp::Ge,
			_ => return Ok(left),
		};
		self.next();
		let right = self.parse_unary(depth + 1)?;
		Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
	}

	fn parse_unary(&mut self, depth: usize) -> Result<Expr, String> {
		if depth > MAX_DEPTH {
			return Err("expression too deeply nested".into());
		}
		if self.peek() == Some(&Token::Bang) {
			self.next();
			let inner = self.parse_unary(depth + 1)?;
			return Ok(Expr::Not(Box::new(inner)));
		}
		self.parse_primary(depth)
	}

	fn parse_primary(&mut self, depth: usize) -> Result<Expr, String> {
		match self.next() {
			Some(Token::True) => Ok(Expr::Bool(true)),
			Some(Token::False) => Ok(Expr::Bool(false)),
			Some(Token::Null) => Ok(Expr::Null),
			Some(Token::Number(n)) => Ok(Expr::Number(n)),
			Some(Token::Str(s)) => Ok(Expr::Str(s.into())),
			Some(Token::PathVar(name)) => Ok(Expr::Var(name.into())),
			Some(Token::Ident(name)) => {
				check_ident(&name)?;
				let mut parts: Vec<Box<str>> = vec![name.into()];
				while self.peek() == Some(&Token::Dot) {
					self.next();
					match self.next() {
						Some(Token::Ident(member)) => {
							check_ident(&member)?;
							parts.push(member.into());
						}
						_ => return Err("expected member name after '.'".into()),
					}
				}
				Ok(Expr::Member(parts))
			}
			Some(Token::LParen) => {
				let inner = self.parse_expr(depth + 1)?;
				match self.next() {
					Some(Token::RParen) => Ok(inner),
					_ => Err("expected ')'".into()),
				}
			}
			Some(other) => Err(format!("unexpected token {:?}", other)),
			None => Err("unexpected end of expression".into()),
		}
	}
}

fn check_ident(name: &str) -> Result<(), String> {
	if FORBIDDEN_IDENTS.contains(&name) {
		Err(format!("identifier '{}' is not allowed in rules", name))
	} else {
		Ok(())
	}
}

/// Compile a rule expression string
pub fn compile(source: &str) -> CnResult<CompiledExpr> {
	let mut tokens = Vec::new();
	for result in Token::lexer(source) {
		match result {
			Ok(token) => tokens.push(token),
			Err(()) => return Err(compile_err(source, "invalid token")),
		}
	}
	if tokens.is_empty() {
		return Err(compile_err(source, "empty expression"));
	}

	let mut parser = Parser { tokens, pos: 0 };
	let expr = parser.parse_expr(0).map_err(|msg| compile_err(source, &msg))?;
	if parser.pos != parser.tokens.len() {
		return Err(compile_err(source, "trailing input after expression"));
	}
	Ok(CompiledExpr { source: source.into(), expr })
}

// Evaluation //
//************//

/// Evaluation environment for one access check
#[derive(Debug)]
pub struct RuleEnv<'a> {
	pub auth: Option<&'a AuthCtx>,
	/// Epoch millis at check time
	pub now: i64,
	/// Variables captured from `$var` path segments, in walk order
	pub vars: &'a [(Box<str>, Box<str>)],
}

impl CompiledExpr {
	/// Evaluate to a boolean. Any error (null member access, unknown
	/// identifier, type mismatch) is returned so the caller can fail
	/// closed.
	pub fn evaluate(&self, env: &RuleEnv<'_>) -> CnResult<bool> {
		let value = eval(&self.expr, env, 0)?;
		Ok(truthy(&value))
	}
}

fn eval_err(message: impl Into<String>) -> Error {
	Error::ValidationError(message.into())
}

fn eval(expr: &Expr, env: &RuleEnv<'_>, depth: usize) -> CnResult<Value> {
	if depth > MAX_DEPTH {
		return Err(eval_err("expression too deeply nested"));
	}
	match expr {
		Expr::Null => Ok(Value::Null),
		Expr::Bool(b) => Ok(Value::Bool(*b)),
		Expr::Number(n) => serde_json::Number::from_f64(*n)
			.map(Value::Number)
			.ok_or_else(|| eval_err("invalid number")),
		Expr::Str(s) => Ok(Value::String(s.to_string())),
		Expr::Var(name) => env
			.vars
			.iter()
			.find(|(var, _)| var.as_ref() == name.as_ref())
			.map(|(_, value)| Value::String(value.to_string()))
			.ok_or_else(|| eval_err(format!("unknown path variable ${}", name))),
		Expr::Member(parts) => resolve_member(parts, env),
		Expr::Not(inner) => {
			let value = eval(inner, env, depth + 1)?;
			Ok(Value::Bool(!truthy(&value)))
		}
		Expr::And(left, right) => {
			if !truthy(&eval(left, env, depth + 1)?) {
				return Ok(Value::Bool(false));
			}
			Ok(Value::Bool(truthy(&eval(right, env, depth + 1)?)))
		}
		Expr::Or(left, right) => {
			if truthy(&eval(left, env, depth + 1)?) {
				return Ok(Value::Bool(true));
			}
			Ok(Value::Bool(truthy(&eval(right, env, depth + 1)?)))
		}
		Expr::Cmp(op, left, right) => {
			let l = eval(left, env, depth + 1)?;
			let r = eval(right, env, depth + 1)?;
			compare(*op, &l, &r)
		}
	}
}

fn resolve_member(parts: &[Box<str>], env: &RuleEnv<'_>) -> CnResult<Value> {
	match parts[0].as_ref() {
		"now" => {
			if parts.len() > 1 {
				return Err(eval_err("'now' has no members"));
			}
			Ok(Value::Number(env.now.into()))
		}
		"auth" => {
			let Some(auth) = env.auth else {
				if parts.len() == 1 {
					return Ok(Value::Null);
				}
				// Member access on a null identity is an evaluation error,
				// which the engine converts into a deny
				return Err(eval_err("cannot access members of null 'auth'"));
			};
			match parts.len() {
				1 => Ok(serde_json::json!({
					"uid": auth.uid.as_ref(),
					"username": auth.username.as_deref(),
					"email": auth.email.as_deref(),
				})),
				2 => match parts[1].as_ref() {
					"uid" => Ok(Value::String(auth.uid.to_string())),
					"username" => Ok(auth
						.username
						.as_deref()
						.map_or(Value::Null, |v| Value::String(v.to_string()))),
					"email" => Ok(auth
						.email
						.as_deref()
						.map_or(Value::Null, |v| Value::String(v.to_string()))),
					other => Err(eval_err(format!("unknown auth member '{}'", other))),
				},
				_ => Err(eval_err("auth members have no members")),
			}
		}
		other => Err(eval_err(format!("unknown identifier '{}'", other))),
	}
}

fn truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
		Value::String(s) => !s.is_empty(),
		Value::Array(a) => !a.is_empty(),
		Value::Object(o) => !o.is_empty(),
	}
}

fn to_number(value: &Value) -> CnResult<f64> {
	match value {
		Value::Number(n) => n.as_f64().ok_or_else(|| eval_err("invalid number")),
		Value::String(s) => {
			s.parse::<f64>().map_err(|_| eval_err(format!("'{}' is not a number", s)))
		}
		_ => Err(eval_err("expected a number")),
	}
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> CnResult<Value> {
	let result = match op {
		CmpOp::Eq => values_equal(left, right),
		CmpOp::Ne => !values_equal(left, right),
		CmpOp::Lt => to_number(left)? < to_number(right)?,
		CmpOp::Le => to_number(left)? <= to_number(right)?,
		CmpOp::Gt => to_number(left)? > to_number(right)?,
		CmpOp::Ge => to_number(left)? >= to_number(right)?,
	};
	Ok(Value::Bool(result))
}

fn values_equal(left: &Value, right: &Value) -> bool {
	// Numbers compare by value so 1 == 1.0
	if let (Value::Number(l), Value::Number(r)) = (left, right) {
		return l.as_f64() == r.as_f64();
	}
	left == right
}

#[cfg(test)]
mod tests {
	use super::*;

	fn auth(uid: &str) -> AuthCtx {
		AuthCtx { uid: uid.into(), username: Some(uid.into()), email: None }
	}

	fn env<'a>(auth: Option<&'a AuthCtx>, vars: &'a [(Box<str>, Box<str>)]) -> RuleEnv<'a> {
		RuleEnv { auth, now: 1_700_000_000_000, vars }
	}

	#[test]
	fn test_uid_matches_path_var() {
		let expr = compile("auth.uid === $uid").unwrap();
		let user = auth("u1");
		let vars: Vec<(Box<str>, Box<str>)> = vec![("uid".into(), "u1".into())];
		assert!(expr.evaluate(&env(Some(&user), &vars)).unwrap());

		let vars: Vec<(Box<str>, Box<str>)> = vec![("uid".into(), "u2".into())];
		assert!(!expr.evaluate(&env(Some(&user), &vars)).unwrap());
	}

	#[test]
	fn test_auth_null_comparison() {
		let expr = compile("auth !== null").unwrap();
		let user = auth("u1");
		assert!(expr.evaluate(&env(Some(&user), &[])).unwrap());
		assert!(!expr.evaluate(&env(None, &[])).unwrap());
	}

	#[test]
	fn test_member_access_on_null_auth_errors() {
		let expr = compile("auth.uid === 'u1'").unwrap();
		assert!(expr.evaluate(&env(None, &[])).is_err());
	}

	#[test]
	fn test_boolean_connectives() {
		let expr = compile("auth !== null && (auth.uid === 'u1' || auth.uid === 'u2')").unwrap();
		let u1 = auth("u1");
		let u3 = auth("u3");
		assert!(expr.evaluate(&env(Some(&u1), &[])).unwrap());
		assert!(!expr.evaluate(&env(Some(&u3), &[])).unwrap());
	}

	#[test]
	fn test_numeric_comparison_with_now() {
		let expr = compile("now > 1000").unwrap();
		assert!(expr.evaluate(&env(None, &[])).unwrap());
	}

	#[test]
	fn test_forbidden_identifiers_rejected() {
		assert!(compile("require('fs')").is_err());
		assert!(compile("import x").is_err());
		assert!(compile("auth.__proto__ === null").is_err());
		assert!(compile("eval").is_err());
	}

	#[test]
	fn test_malformed_expressions_rejected() {
		assert!(compile("").is_err());
		assert!(compile("auth.uid ===").is_err());
		assert!(compile("(auth.uid").is_err());
		assert!(compile("auth.uid === 'u1' extra").is_err());
		assert!(compile("a; b").is_err());
	}

	#[test]
	fn test_unknown_identifier_is_eval_error() {
		let expr = compile("data === null").unwrap();
		assert!(expr.evaluate(&env(None, &[])).is_err());
	}
}

// vim: ts=4
