//! 🧼 Key sanitizing: scrubbing record keys until the store stops complaining.
//!
//! Document stores have opinions about keys. Dots mean "nested path", a leading `$` means
//! "operator", and both mean "I'm rejecting your document" when they show up in a field name.
//! A [`KeySanitizer`] walks every map at every depth and rewrites the keys that match its
//! rules. Arrays get walked element-wise. Leaves are left alone, they did nothing wrong.
//!
//! 🧠 Knowledge graph:
//! - Pure. No store access, no destination access, no shared state.
//! - Rules run in order, each one producing a fresh record.
//! - Zero rules means zero work: the record comes back untouched.
//! - A rule whose replacement would match its own pattern is refused at construction,
//!   so running a sanitizer twice never changes anything the second time.

use regex::{NoExpand, Regex};
use tracing::warn;

use crate::common::{Record, Value};
use crate::error::{Result, SinkError};

/// 🔍 One rewrite: every key match of `pattern` becomes `replacement`.
#[derive(Debug, Clone)]
pub struct KeyRule {
    pattern: Regex,
    replacement: String,
}

impl KeyRule {
    /// 🏗️ Compile a rule. Bad regexes and self-matching replacements are configuration errors.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let replacement = replacement.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            SinkError::config(format!("invalid key rule pattern '{pattern}': {e}"))
        })?;
        if pattern.is_match(&replacement) {
            return Err(SinkError::config(format!(
                "key rule replacement '{replacement}' matches its own pattern '{pattern}'"
            )));
        }
        Ok(Self {
            pattern,
            replacement,
        })
    }

    /// 🔧 Every `.` inside a key.
    pub fn dots(replacement: impl Into<String>) -> Result<Self> {
        Self::new(r"\.", replacement)
    }

    /// 🔧 A leading run of `$` sentinels.
    pub fn leading_dollar(replacement: impl Into<String>) -> Result<Self> {
        Self::new(r"^\$+", replacement)
    }

    fn rewrite_key(&self, key: &str) -> String {
        self.pattern
            .replace_all(key, NoExpand(&self.replacement))
            .into_owned()
    }

    fn apply_value(&self, value: &Value) -> Value {
        match value {
            Value::Map(record) => Value::Map(self.apply(record)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.apply_value(v)).collect()),
            leaf => leaf.clone(),
        }
    }

    /// 🔄 Rewrite every matching key in `record`, recursively. Returns a new record.
    ///
    /// Two keys that end up with the same name collapse into one; the later key in key
    /// order wins and the collision is logged.
    pub fn apply(&self, record: &Record) -> Record {
        let mut clean = Record::new();
        for (key, value) in record {
            let rewritten = self.rewrite_key(key);
            if clean.insert(rewritten.clone(), self.apply_value(value)).is_some() {
                warn!(
                    key = %key,
                    sanitized = %rewritten,
                    "⚠️ sanitized key collides with another, keeping the later value"
                );
            }
        }
        clean
    }
}

/// 🧼 An ordered stack of [`KeyRule`]s.
#[derive(Debug, Clone, Default)]
pub struct KeySanitizer {
    rules: Vec<KeyRule>,
}

impl KeySanitizer {
    pub fn new(rules: Vec<KeyRule>) -> Self {
        Self { rules }
    }

    /// 🏗️ The two standard rules, each only when configured.
    pub fn from_replacements(dot: Option<&str>, dollar: Option<&str>) -> Result<Self> {
        let mut rules = Vec::new();
        if let Some(dot) = dot {
            rules.push(KeyRule::dots(dot)?);
        }
        if let Some(dollar) = dollar {
            // -- a dot smuggled in by the dollar rule would get rewritten on the next pass
            if let Some(clash) = rules.iter().find(|rule| rule.pattern.is_match(dollar)) {
                return Err(SinkError::config(format!(
                    "key rule replacement '{dollar}' matches the earlier pattern '{}'",
                    clash.pattern
                )));
            }
            rules.push(KeyRule::leading_dollar(dollar)?);
        }
        Ok(Self::new(rules))
    }

    pub fn is_noop(&self) -> bool {
        self.rules.is_empty()
    }

    /// 🚿 Run every rule over the record, in order.
    pub fn sanitize(&self, record: Record) -> Record {
        if self.is_noop() {
            return record;
        }
        self.rules
            .iter()
            .fold(record, |current, rule| rule.apply(&current))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::common::record;
    use crate::testing::count_warnings;

    fn nested() -> Record {
        let mut inner = record([("b.c", 1), ("$op", 2)]);
        inner.insert(
            "list".into(),
            Value::Array(vec![
                Value::Map(record([("x.y", "deep")])),
                Value::String("a.b stays, it's a value".into()),
            ]),
        );
        let mut outer = record([("$$top.level", "v")]);
        outer.insert("a.b".into(), Value::Map(inner));
        outer
    }

    #[test]
    fn the_one_where_every_depth_gets_scrubbed() {
        let sanitizer = KeySanitizer::from_replacements(Some("_"), Some("_")).unwrap();
        let clean = sanitizer.sanitize(nested());

        assert!(clean.contains_key("_top_level"));
        let Value::Map(inner) = &clean["a_b"] else {
            panic!("💀 nested map went missing");
        };
        assert_eq!(inner["b_c"], Value::Int(1));
        assert_eq!(inner["_op"], Value::Int(2));
        let Value::Array(list) = &inner["list"] else {
            panic!("💀 the list left without saying goodbye");
        };
        assert_eq!(list[0], Value::Map(record([("x_y", "deep")])));
        assert_eq!(list[1], Value::String("a.b stays, it's a value".into()));
    }

    #[test]
    fn the_one_where_sanitizing_twice_changes_nothing() {
        let sanitizer = KeySanitizer::from_replacements(Some(""), Some("")).unwrap();
        let once = sanitizer.sanitize(nested());
        let twice = sanitizer.sanitize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn the_one_where_no_rules_means_no_work() {
        let sanitizer = KeySanitizer::default();
        assert!(sanitizer.is_noop());
        assert_eq!(sanitizer.sanitize(nested()), nested());
    }

    #[test]
    fn the_one_where_dollar_in_a_replacement_is_taken_literally() {
        let rule = KeyRule::dots("$1").unwrap();
        assert_eq!(rule.apply(&record([("a.b", 1)])), record([("a$1b", 1)]));
    }

    #[test]
    fn the_one_where_a_replacement_that_rematches_is_refused() {
        assert!(matches!(KeyRule::dots("."), Err(SinkError::Configuration(_))));
        assert!(matches!(
            KeyRule::leading_dollar("$x"),
            Err(SinkError::Configuration(_))
        ));
        assert!(matches!(
            KeyRule::new("(", "_"),
            Err(SinkError::Configuration(_))
        ));
        assert!(KeySanitizer::from_replacements(Some("_"), Some("dot.")).is_err());
        assert!(KeySanitizer::from_replacements(None, Some("dot.")).is_ok());
    }

    #[test]
    fn the_one_where_two_keys_become_one_and_somebody_says_so() {
        let (_guard, warnings) = count_warnings();
        let sanitizer = KeySanitizer::from_replacements(Some("_"), None).unwrap();
        let clean = sanitizer.sanitize(record([("a.b", 1), ("a_b", 2)]));
        assert_eq!(clean, record([("a_b", 2)]));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        sanitizer.sanitize(record([("a.b", 1), ("c", 2)]));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }
}
