//! Declarative readiness rules for stateful components.
//!
//! A component owns a [`RuleSet`] describing which of its fields must hold
//! (or must not hold) particular values before it is usable. Validity is
//! recomputed from the current field values on every call and never cached.

use std::error::Error;
use std::fmt;

use serde::Serialize;

type Probe<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Rule<T> {
    attribute: &'static str,
    matches: Probe<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    Positive,
    Negative,
    AlternatePositive,
    AlternateNegative,
}

impl RuleGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleGroup::Positive => "positive",
            RuleGroup::Negative => "negative",
            RuleGroup::AlternatePositive => "alternate_positive",
            RuleGroup::AlternateNegative => "alternate_negative",
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reason a component is currently invalid.
///
/// Strict groups report a single attribute per violation. Alternate groups
/// only fail as a whole, so their violation lists every attribute of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub group: RuleGroup,
    pub attributes: Vec<&'static str>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.attributes.join(", ");
        match self.group {
            RuleGroup::Positive => write!(f, "{} does not hold its required value", names),
            RuleGroup::Negative => write!(f, "{} holds a forbidden value", names),
            RuleGroup::AlternatePositive => {
                write!(f, "none of [{}] holds its required value", names)
            }
            RuleGroup::AlternateNegative => write!(f, "all of [{}] hold forbidden values", names),
        }
    }
}

pub struct RuleSet<T> {
    positive: Vec<Rule<T>>,
    negative: Vec<Rule<T>>,
    alternate_positive: Vec<Rule<T>>,
    alternate_negative: Vec<Rule<T>>,
}

impl<T: 'static> Default for RuleSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> RuleSet<T> {
    pub fn new() -> Self {
        Self {
            positive: Vec::new(),
            negative: Vec::new(),
            alternate_positive: Vec::new(),
            alternate_negative: Vec::new(),
        }
    }

    /// Declares that `getter(target)` must equal `expected`.
    ///
    /// With `alternate` set the rule joins the disjunctive group instead, where
    /// one matching rule is enough. Returns `expected` so the call can double
    /// as the field initializer.
    pub fn require<V, F>(
        &mut self,
        attribute: &'static str,
        getter: F,
        expected: V,
        alternate: bool,
    ) -> V
    where
        V: PartialEq + Clone + Send + Sync + 'static,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        let wanted = expected.clone();
        let group = if alternate {
            &mut self.alternate_positive
        } else {
            &mut self.positive
        };
        upsert(
            group,
            Rule {
                attribute,
                matches: Box::new(move |target| getter(target) == wanted),
            },
        );
        expected
    }

    /// Declares that `getter(target)` must not equal `forbidden`.
    ///
    /// An alternate rule only breaks validity when every alternate forbidden
    /// rule matches at the same time.
    pub fn forbid<V, F>(
        &mut self,
        attribute: &'static str,
        getter: F,
        forbidden: V,
        alternate: bool,
    ) -> V
    where
        V: PartialEq + Clone + Send + Sync + 'static,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        let unwanted = forbidden.clone();
        let group = if alternate {
            &mut self.alternate_negative
        } else {
            &mut self.negative
        };
        upsert(
            group,
            Rule {
                attribute,
                matches: Box::new(move |target| getter(target) == unwanted),
            },
        );
        forbidden
    }

    pub fn is_valid(&self, target: &T) -> bool {
        if self.positive.iter().any(|rule| !(rule.matches)(target)) {
            return false;
        }
        if self.negative.iter().any(|rule| (rule.matches)(target)) {
            return false;
        }
        if !self.alternate_positive.is_empty()
            && self
                .alternate_positive
                .iter()
                .all(|rule| !(rule.matches)(target))
        {
            return false;
        }
        if !self.alternate_negative.is_empty()
            && self
                .alternate_negative
                .iter()
                .all(|rule| (rule.matches)(target))
        {
            return false;
        }
        true
    }

    pub fn violations(&self, target: &T) -> Vec<Violation> {
        let mut found = Vec::new();
        for rule in &self.positive {
            if !(rule.matches)(target) {
                found.push(Violation {
                    group: RuleGroup::Positive,
                    attributes: vec![rule.attribute],
                });
            }
        }
        for rule in &self.negative {
            if (rule.matches)(target) {
                found.push(Violation {
                    group: RuleGroup::Negative,
                    attributes: vec![rule.attribute],
                });
            }
        }
        if !self.alternate_positive.is_empty()
            && self
                .alternate_positive
                .iter()
                .all(|rule| !(rule.matches)(target))
        {
            found.push(Violation {
                group: RuleGroup::AlternatePositive,
                attributes: attribute_names(&self.alternate_positive),
            });
        }
        if !self.alternate_negative.is_empty()
            && self
                .alternate_negative
                .iter()
                .all(|rule| (rule.matches)(target))
        {
            found.push(Violation {
                group: RuleGroup::AlternateNegative,
                attributes: attribute_names(&self.alternate_negative),
            });
        }
        found
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.positive.len()
            + self.negative.len()
            + self.alternate_positive.len()
            + self.alternate_negative.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for RuleSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("positive", &attribute_names(&self.positive))
            .field("negative", &attribute_names(&self.negative))
            .field("alternate_positive", &attribute_names(&self.alternate_positive))
            .field("alternate_negative", &attribute_names(&self.alternate_negative))
            .finish()
    }
}

fn upsert<T>(group: &mut Vec<Rule<T>>, rule: Rule<T>) {
    match group
        .iter_mut()
        .find(|existing| existing.attribute == rule.attribute)
    {
        Some(existing) => *existing = rule,
        None => group.push(rule),
    }
}

fn attribute_names<T>(group: &[Rule<T>]) -> Vec<&'static str> {
    group.iter().map(|rule| rule.attribute).collect()
}

/// A stateful object whose readiness is described by a [`RuleSet`].
pub trait Component: Sized + 'static {
    fn rules(&self) -> &RuleSet<Self>;

    fn component_name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    fn is_valid(&self) -> bool {
        self.rules().is_valid(self)
    }

    fn violations(&self) -> Vec<Violation> {
        self.rules().violations(self)
    }

    fn ensure_valid(&self) -> Result<(), InvalidState> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(InvalidState::new(self.component_name()))
        }
    }
}

/// Runs `operation` only if `component` is valid. The result may borrow
/// from the component.
pub fn guard<'a, C, R, E, F>(component: &'a C, operation: F) -> Result<R, E>
where
    C: Component,
    E: From<InvalidState>,
    F: FnOnce(&'a C) -> Result<R, E>,
{
    component.ensure_valid()?;
    operation(component)
}

pub fn guard_mut<'a, C, R, E, F>(component: &'a mut C, operation: F) -> Result<R, E>
where
    C: Component,
    E: From<InvalidState>,
    F: FnOnce(&'a mut C) -> Result<R, E>,
{
    component.ensure_valid()?;
    operation(component)
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidState {
    pub component: &'static str,
}

impl InvalidState {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not in a valid state", self.component)
    }
}

impl Error for InvalidState {}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::{guard, guard_mut, Component, InvalidState, RuleGroup, RuleSet};

    struct Pair {
        a: i64,
        b: i64,
        rules: RuleSet<Pair>,
    }

    impl Component for Pair {
        fn rules(&self) -> &RuleSet<Self> {
            &self.rules
        }
    }

    fn pair(a: i64, b: i64) -> Pair {
        Pair {
            a,
            b,
            rules: RuleSet::new(),
        }
    }

    struct Maybe {
        a: Option<&'static str>,
        b: Option<&'static str>,
        rules: RuleSet<Maybe>,
    }

    impl Component for Maybe {
        fn rules(&self) -> &RuleSet<Self> {
            &self.rules
        }
    }

    #[test]
    fn empty_rule_set_is_vacuously_valid() {
        let target = pair(0, 0);
        assert!(target.rules.is_empty());
        assert!(target.is_valid());
        assert!(target.violations().is_empty());
    }

    #[test]
    fn positive_rule_tracks_current_value() {
        let mut target = pair(3, 0);
        target.rules.require("a", |p: &Pair| p.a, 3, false);
        assert!(target.is_valid());

        target.a = 4;
        assert!(!target.is_valid());
        assert_eq!(target.violations()[0].group, RuleGroup::Positive);
        assert_eq!(target.violations()[0].attributes, vec!["a"]);

        target.a = 3;
        assert!(target.is_valid());
    }

    #[test]
    fn negative_rule_fails_only_on_forbidden_value() {
        let mut target = pair(0, 0);
        target.rules.forbid("a", |p: &Pair| p.a, 0, false);
        assert!(!target.is_valid());
        target.a = 7;
        assert!(target.is_valid());
        target.a = -1;
        assert!(target.is_valid());
    }

    #[test]
    fn alternate_positive_needs_one_holding_rule() {
        let mut target = pair(1, 99);
        target.rules.require("a", |p: &Pair| p.a, 1, true);
        target.rules.require("b", |p: &Pair| p.b, 2, true);
        assert!(target.is_valid());

        target.b = 2;
        assert!(target.is_valid());

        target.a = 5;
        target.b = 10;
        assert!(!target.is_valid());
        let violations = target.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].group, RuleGroup::AlternatePositive);
        assert_eq!(violations[0].attributes, vec!["a", "b"]);
    }

    #[test]
    fn alternate_negative_fails_only_when_all_match() {
        let mut target = Maybe {
            a: None,
            b: None,
            rules: RuleSet::new(),
        };
        target.rules.forbid("a", |m: &Maybe| m.a, None, true);
        target.rules.forbid("b", |m: &Maybe| m.b, None, true);
        assert!(!target.is_valid());

        target.b = Some("set");
        assert!(target.is_valid());

        target.a = Some("set");
        target.b = None;
        assert!(target.is_valid());

        target.a = None;
        assert!(!target.is_valid());
        assert_eq!(target.violations()[0].group, RuleGroup::AlternateNegative);
    }

    #[test]
    fn registration_returns_value_for_inline_initialization() {
        let mut rules = RuleSet::new();
        let a = rules.require("a", |p: &Pair| p.a, 42, false);
        let b = rules.forbid("b", |p: &Pair| p.b, 0, false);
        let target = Pair { a, b, rules };
        assert_eq!(target.a, 42);
        assert_eq!(target.b, 0);
        assert!(!target.is_valid());
    }

    #[test]
    fn reregistering_an_attribute_overwrites_the_rule() {
        let mut target = pair(2, 0);
        target.rules.require("a", |p: &Pair| p.a, 1, false);
        assert!(!target.is_valid());
        target.rules.require("a", |p: &Pair| p.a, 2, false);
        assert!(target.is_valid());
        assert_eq!(target.rules.len(), 1);
    }

    #[test]
    fn groups_are_independent() {
        let mut target = pair(1, 0);
        target.rules.require("a", |p: &Pair| p.a, 1, false);
        target.rules.forbid("a", |p: &Pair| p.a, 1, false);
        assert_eq!(target.rules.len(), 2);
        assert!(!target.is_valid());
        assert_eq!(target.violations().len(), 1);
        assert_eq!(target.violations()[0].group, RuleGroup::Negative);
    }

    #[test]
    fn mixed_groups_are_evaluated_together() {
        let mut target = pair(1, 5);
        target.rules.require("a", |p: &Pair| p.a, 1, false);
        target.rules.forbid("b", |p: &Pair| p.b, 0, false);
        target.rules.require("b", |p: &Pair| p.b, 5, true);
        target.rules.forbid("a", |p: &Pair| p.a, 9, true);
        assert!(target.is_valid());

        target.b = 6;
        assert!(!target.is_valid());
        assert_eq!(target.violations()[0].group, RuleGroup::AlternatePositive);
    }

    #[test]
    fn validity_is_idempotent_without_mutation() {
        let mut target = pair(1, 2);
        target.rules.require("a", |p: &Pair| p.a, 1, false);
        target.rules.forbid("b", |p: &Pair| p.b, 3, true);
        let first = target.is_valid();
        for _ in 0..10 {
            assert_eq!(target.is_valid(), first);
        }
    }

    #[test]
    fn guard_blocks_operation_on_invalid_component() {
        let mut target = pair(0, 0);
        target.rules.forbid("a", |p: &Pair| p.a, 0, false);
        let calls = Cell::new(0);

        let err = guard(&target, |_| -> Result<(), InvalidState> {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .expect_err("invalid component should be refused");
        assert_eq!(calls.get(), 0);
        assert_eq!(err.component, "Pair");
        assert_eq!(err.to_string(), "Pair is not in a valid state");
    }

    #[test]
    fn guard_runs_operation_once_and_returns_its_result() {
        let mut target = pair(1, 0);
        target.rules.forbid("a", |p: &Pair| p.a, 0, false);
        let calls = Cell::new(0);

        let value = guard(&target, |p| -> Result<i64, InvalidState> {
            calls.set(calls.get() + 1);
            Ok(p.a * 10)
        })
        .expect("valid component should run");
        assert_eq!(value, 10);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn guard_propagates_operation_errors_unchanged() {
        #[derive(Debug, PartialEq)]
        enum OpError {
            Invalid,
            Failed(&'static str),
        }
        impl From<InvalidState> for OpError {
            fn from(_: InvalidState) -> Self {
                OpError::Invalid
            }
        }

        let mut target = pair(1, 0);
        let err = guard_mut(&mut target, |p| -> Result<(), OpError> {
            p.b = 11;
            Err(OpError::Failed("boom"))
        })
        .expect_err("operation error should surface");
        assert_eq!(err, OpError::Failed("boom"));
        assert_eq!(target.b, 11);

        target.rules.forbid("a", |p: &Pair| p.a, 1, false);
        let err = guard_mut(&mut target, |_| -> Result<(), OpError> { Ok(()) })
            .expect_err("invalid component should be refused");
        assert_eq!(err, OpError::Invalid);
    }

    struct Engine {
        engine: Option<String>,
        commits: usize,
        rules: RuleSet<Engine>,
    }

    impl Component for Engine {
        fn rules(&self) -> &RuleSet<Self> {
            &self.rules
        }
    }

    impl Engine {
        fn new() -> Self {
            let mut rules = RuleSet::new();
            let engine = rules.forbid("engine", |e: &Engine| e.engine.clone(), None, false);
            Self {
                engine,
                commits: 0,
                rules,
            }
        }

        fn commit(&mut self) -> Result<usize, InvalidState> {
            guard_mut(self, |e| {
                e.commits += 1;
                Ok(e.commits)
            })
        }
    }

    #[test]
    fn engine_must_be_set_before_commit() {
        let mut db = Engine::new();
        assert!(!db.is_valid());
        let err = db.commit().expect_err("commit without engine should fail");
        assert_eq!(err.component, "Engine");
        assert_eq!(db.commits, 0);

        db.engine = Some("sqlite://memory".to_string());
        assert!(db.is_valid());
        assert_eq!(db.commit().expect("commit should run"), 1);
    }

    #[test]
    fn debug_lists_registered_attributes() {
        let mut rules = RuleSet::new();
        rules.require("a", |p: &Pair| p.a, 1, false);
        rules.forbid("b", |p: &Pair| p.b, 0, true);
        let rendered = format!("{rules:?}");
        assert!(rendered.contains("positive: [\"a\"]"));
        assert!(rendered.contains("alternate_negative: [\"b\"]"));
    }
}
