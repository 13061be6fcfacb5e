use crate::types::DecisionContext;
use parking_lot::RwLock;
use tracing::debug;

/// Predicate a rule evaluates against a decision context.
pub type RulePredicate = Box<dyn Fn(&DecisionContext) -> bool + Send + Sync>;

struct Rule {
    name: String,
    option: String,
    predicate: RulePredicate,
}

/// Named boolean rules, each selecting one option when it fires.
///
/// Rules are evaluated in insertion order. Adding a rule under an existing
/// name replaces it in place.
#[derive(Default)]
pub struct DecisionEngine {
    rules: RwLock<Vec<Rule>>,
}

impl DecisionEngine {
    /// Engine with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule that selects `option` whenever `predicate` holds.
    pub fn add_rule<F>(&self, name: impl Into<String>, option: impl Into<String>, predicate: F)
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        let rule = Rule {
            name: name.into(),
            option: option.into(),
            predicate: Box::new(predicate),
        };
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    /// Remove a rule. Returns `false` if it was unknown.
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    /// Evaluate one rule. Unknown rules evaluate to `false`.
    pub fn evaluate_rule(&self, name: &str, context: &DecisionContext) -> bool {
        self.rules
            .read()
            .iter()
            .find(|r| r.name == name)
            .is_some_and(|r| (r.predicate)(context))
    }

    /// Evaluate every rule, in order.
    pub fn evaluate_all_rules(&self, context: &DecisionContext) -> Vec<(String, bool)> {
        self.rules
            .read()
            .iter()
            .map(|r| (r.name.clone(), (r.predicate)(context)))
            .collect()
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// The first rule that fires and selects one of `options`, as `(rule, option)`.
    pub fn first_match(&self, options: &[&str], context: &DecisionContext) -> Option<(String, String)> {
        let rules = self.rules.read();
        for rule in rules.iter() {
            if !options.contains(&rule.option.as_str()) {
                continue;
            }
            if (rule.predicate)(context) {
                debug!(rule = %rule.name, option = %rule.option, "Decision rule fired");
                return Some((rule.name.clone(), rule.option.clone()));
            }
        }
        None
    }
}
