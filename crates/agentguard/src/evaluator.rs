//! Priority-ordered rule evaluation over tool-call contexts

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use agentguard_core::paths;

use crate::context::ToolCall;
use crate::policy::{Action, Condition, Operator, Policy, Rule};

/// The evaluator's verdict for one tool call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<Rule>,
    pub reason: String,
}

/// Applies a policy's rules to tool calls.
///
/// Built once per loaded policy: the evaluation order (descending priority,
/// stable on ties) and the regex conditions are compiled up front, so
/// `decide` is pure lookup work. Evaluation never fails; degraded
/// conditions log a diagnostic and simply don't match.
pub struct Evaluator {
    policy: Arc<Policy>,
    /// Rule indices in evaluation order.
    order: Vec<usize>,
    /// Compiled regex conditions, keyed by (rule, condition) index.
    regexes: HashMap<(usize, usize), Regex>,
}

impl Evaluator {
    pub fn new(policy: Arc<Policy>) -> Self {
        let mut order: Vec<usize> = (0..policy.rules.len()).collect();
        // Stable sort: ties keep declaration order.
        order.sort_by_key(|&i| std::cmp::Reverse(policy.rules[i].priority));

        let mut regexes = HashMap::new();
        for (ri, rule) in policy.rules.iter().enumerate() {
            for (ci, condition) in rule.conditions.iter().enumerate() {
                if condition.operator != Operator::Regex {
                    continue;
                }
                match condition.value.as_str().map(Regex::new) {
                    Some(Ok(re)) => {
                        regexes.insert((ri, ci), re);
                    }
                    Some(Err(e)) => {
                        warn!(rule = %rule.name, pattern = ?condition.value, error = %e,
                              "regex condition failed to compile; it will never match");
                    }
                    None => {
                        warn!(rule = %rule.name, value = ?condition.value,
                              "regex condition value is not a string; it will never match");
                    }
                }
            }
        }

        Self {
            policy,
            order,
            regexes,
        }
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Decide a tool call: the highest-priority rule whose conditions all
    /// match wins; otherwise the policy's default action applies.
    pub fn decide(&self, tool_call: &ToolCall) -> Decision {
        let context = self.build_context(tool_call);

        for &ri in &self.order {
            let rule = &self.policy.rules[ri];
            let matched = rule
                .conditions
                .iter()
                .enumerate()
                .all(|(ci, condition)| self.condition_matches(ri, ci, condition, &context));
            if matched {
                debug!(rule = %rule.name, action = %rule.action, tool = %tool_call.tool_name,
                       "rule matched");
                return Decision {
                    action: rule.action,
                    matched_rule: Some(rule.clone()),
                    reason: format!("Matched rule: {}", rule.name),
                };
            }
        }

        debug!(action = %self.policy.default_action, tool = %tool_call.tool_name,
               "no rule matched; applying default action");
        Decision {
            action: self.policy.default_action,
            matched_rule: None,
            reason: "No matching rules found".to_string(),
        }
    }

    fn build_context(&self, tool_call: &ToolCall) -> Value {
        serde_json::json!({
            "toolCall": tool_call,
            "policy": {
                "name": self.policy.name,
                "version": self.policy.version,
                "description": self.policy.description,
            },
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    fn condition_matches(
        &self,
        rule_idx: usize,
        condition_idx: usize,
        condition: &Condition,
        context: &Value,
    ) -> bool {
        let extracted = paths::lookup(context, &condition.field);

        match condition.operator {
            Operator::Equals => extracted.is_some_and(|v| values_equal(v, &condition.value)),
            Operator::Contains => string_op(extracted, &condition.value, |s, n| s.contains(n)),
            Operator::StartsWith => {
                string_op(extracted, &condition.value, |s, n| s.starts_with(n))
            }
            Operator::EndsWith => string_op(extracted, &condition.value, |s, n| s.ends_with(n)),
            Operator::Regex => {
                let Some(re) = self.regexes.get(&(rule_idx, condition_idx)) else {
                    // Bad pattern was diagnosed at build time.
                    return false;
                };
                extracted
                    .and_then(Value::as_str)
                    .is_some_and(|s| re.is_match(s))
            }
            Operator::In => condition.value.as_array().is_some_and(|candidates| {
                extracted.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)))
            }),
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
                let (Some(lhs), Some(rhs)) = (
                    extracted.and_then(as_number),
                    as_number(&condition.value),
                ) else {
                    return false;
                };
                match condition.operator {
                    Operator::Gt => lhs > rhs,
                    Operator::Lt => lhs < rhs,
                    Operator::Gte => lhs >= rhs,
                    Operator::Lte => lhs <= rhs,
                    _ => false,
                }
            }
        }
    }
}

/// Deep equality. Two JSON numbers compare numerically (`100` equals
/// `100.0`), but there is no cross-type coercion: a string never equals
/// a number. Numeric string parsing belongs to `gt`/`lt`/`gte`/`lte`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Numeric coercion: numbers pass through, strings are parsed. Anything
/// unparseable is a non-match.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        _ => None,
    }
}

fn string_op(
    extracted: Option<&Value>,
    expected: &Value,
    op: impl Fn(&str, &str) -> bool,
) -> bool {
    match (extracted.and_then(Value::as_str), expected.as_str()) {
        (Some(actual), Some(needle)) => op(actual, needle),
        _ => false,
    }
}
