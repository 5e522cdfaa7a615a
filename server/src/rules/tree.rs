//! Access rule tree.
//!
//! The rule document mirrors the data hierarchy: each node may define
//! `.read`, `.write`, `.validate` rules and a `.schema`, with child keys
//! naming path segments. Keys starting with `$` capture the matched
//! segment as a variable for rule expressions; `*` matches without
//! capturing. The shallowest rule found on the walked path answers the
//! check; exhaustion without a rule denies by default.

use serde_json::Value;

use crate::prelude::*;
use crate::rules::expr::{CompiledExpr, RuleEnv, compile};

#[derive(Debug, Clone)]
pub enum Rule {
	Allow(bool),
	Expr(CompiledExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
	Read,
	Write,
	Validate,
}

impl RuleKind {
	fn key(self) -> &'static str {
		match self {
			RuleKind::Read => ".read",
			RuleKind::Write => ".write",
			RuleKind::Validate => ".validate",
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct RuleNode {
	pub read: Option<Rule>,
	pub write: Option<Rule>,
	pub validate: Option<Rule>,
	/// Held for the storage engine's schema validation; not evaluated here
	pub schema: Option<Value>,
	/// Children in document order; order decides which wildcard wins
	pub children: Vec<(Box<str>, RuleNode)>,
}

impl RuleNode {
	fn rule(&self, kind: RuleKind) -> Option<&Rule> {
		match kind {
			RuleKind::Read => self.read.as_ref(),
			RuleKind::Write => self.write.as_ref(),
			RuleKind::Validate => self.validate.as_ref(),
		}
	}

	/// Literal child match first, then the first wildcard/variable child
	fn child_for(&self, segment: &str) -> Option<(&str, &RuleNode)> {
		if let Some((key, child)) =
			self.children.iter().find(|(key, _)| key.as_ref() == segment)
		{
			return Some((key, child));
		}
		self.children
			.iter()
			.find(|(key, _)| key.as_ref() == "*" || key.starts_with('$'))
			.map(|(key, child)| (key.as_ref(), child))
	}
}

/// Outcome of an access check
#[derive(Debug, Clone)]
pub struct AccessResult {
	pub allow: bool,
	/// Denial code: `rule`, `no_rule`, `private`, or `exception`
	pub code: Option<Box<str>>,
	pub message: Option<Box<str>>,
	/// Rule-tree path of the node that answered, when one did
	pub rule_path: Option<Box<str>>,
}

impl AccessResult {
	pub fn allow(rule_path: Option<&str>) -> Self {
		Self { allow: true, code: None, message: None, rule_path: rule_path.map(Box::from) }
	}

	pub fn deny(code: &str, message: impl Into<Box<str>>, rule_path: Option<&str>) -> Self {
		Self {
			allow: false,
			code: Some(Box::from(code)),
			message: Some(message.into()),
			rule_path: rule_path.map(Box::from),
		}
	}

	/// Convert a denial into the transport-level error
	pub fn into_error(self) -> Error {
		Error::AccessDenied {
			code: self.code.unwrap_or_else(|| Box::from("rule")),
			message: self.message.unwrap_or_else(|| Box::from("access denied")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RuleTree {
	root: RuleNode,
}

impl RuleTree {
	/// Parse a rule document of the form `{ "rules": { … } }`
	pub fn from_document(doc: &Value) -> CnResult<RuleTree> {
		let rules = doc
			.get("rules")
			.ok_or_else(|| Error::ValidationError("rule document has no 'rules' member".into()))?;
		let root = parse_node(rules, "")?;
		Ok(RuleTree { root })
	}

	pub fn from_root(root: RuleNode) -> RuleTree {
		RuleTree { root }
	}

	/// Walk the tree for `path` and answer the read or write check
	pub fn check(&self, env_auth: Option<&crate::auth::account::AuthCtx>, path: &str, write: bool) -> AccessResult {
		let kind = if write { RuleKind::Write } else { RuleKind::Read };
		let op = if write { "write" } else { "read" };

		let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
		let mut node = &self.root;
		let mut rule_path: Vec<&str> = Vec::new();
		let mut vars: Vec<(Box<str>, Box<str>)> = Vec::new();
		let mut index = 0;

		loop {
			if let Some(rule) = node.rule(kind) {
				let at = rule_path.join("/");
				return match rule {
					Rule::Allow(true) => AccessResult::allow(Some(&at)),
					Rule::Allow(false) => AccessResult::deny(
						"rule",
						format!("{} operation denied by rule", op),
						Some(&at),
					),
					Rule::Expr(expr) => {
						let env = RuleEnv { auth: env_auth, now: Timestamp::now().0, vars: &vars };
						match expr.evaluate(&env) {
							Ok(true) => AccessResult::allow(Some(&at)),
							Ok(false) => AccessResult::deny(
								"rule",
								format!("{} operation denied by rule", op),
								Some(&at),
							),
							// A throwing rule must never be mistaken for an allow
							Err(err) => AccessResult::deny(
								"exception",
								format!("rule evaluation failed: {}", err),
								Some(&at),
							),
						}
					}
				};
			}

			if index >= segments.len() {
				return AccessResult::deny("no_rule", format!("no rule set for {}", op), None);
			}

			let segment = segments[index];
			match node.child_for(segment) {
				Some((key, child)) => {
					if let Some(name) = key.strip_prefix('$') {
						vars.push((name.into(), segment.into()));
					}
					rule_path.push(key);
					node = child;
					index += 1;
				}
				None => {
					return AccessResult::deny("no_rule", format!("no rule set for {}", op), None);
				}
			}
		}
	}
}

fn parse_rule(value: &Value, at: &str, key: &str) -> CnResult<Rule> {
	match value {
		Value::Bool(allow) => Ok(Rule::Allow(*allow)),
		Value::String(source) => Ok(Rule::Expr(compile(source)?)),
		_ => Err(Error::ValidationError(format!(
			"rule {}/{} must be a boolean or an expression string",
			at, key
		))),
	}
}

fn parse_node(value: &Value, at: &str) -> CnResult<RuleNode> {
	let Value::Object(map) = value else {
		return Err(Error::ValidationError(format!("rule node at '{}' must be an object", at)));
	};

	let mut node = RuleNode::default();
	for (key, member) in map {
		match key.as_str() {
			".read" => node.read = Some(parse_rule(member, at, key)?),
			".write" => node.write = Some(parse_rule(member, at, key)?),
			".validate" => node.validate = Some(parse_rule(member, at, key)?),
			".schema" => node.schema = Some(member.clone()),
			segment if segment.starts_with('.') => {
				return Err(Error::ValidationError(format!(
					"unknown rule directive '{}' at '{}'",
					segment, at
				)));
			}
			segment => {
				let child_at = if at.is_empty() {
					segment.to_string()
				} else {
					format!("{}/{}", at, segment)
				};
				node.children.push((segment.into(), parse_node(member, &child_at)?));
			}
		}
	}
	Ok(node)
}


// vim: ts=4
