//! Sample id rewriting between portal and repository form.
//!
//! Both directions are ordered rule lists: the first rule whose pattern matches rewrites the id,
//! an id that matches no rule passes through unchanged.

use crate::config::{RegexRule, Settings};
use crate::MtbResult;
use regex::Regex;

#[derive(Clone, Debug)]
struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

fn compile(rules: &[RegexRule]) -> MtbResult<Vec<CompiledRule>> {
    rules
        .iter()
        .map(|rule| {
            Ok(CompiledRule {
                pattern: Regex::new(&rule.pattern)?,
                replacement: rule.replacement.clone(),
            })
        })
        .collect()
}

fn apply(rules: &[CompiledRule], input: &str) -> String {
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(input))
        .map(|rule| {
            rule.pattern
                .replace_all(input, rule.replacement.as_str())
                .into_owned()
        })
        .unwrap_or_else(|| input.to_string())
}

/// Compiled inbound and outbound sample id rules.
#[derive(Clone, Debug, Default)]
pub struct SampleIdRules {
    inbound: Vec<CompiledRule>,
    outbound: Vec<CompiledRule>,
}

impl SampleIdRules {
    pub fn new(inbound: &[RegexRule], outbound: &[RegexRule]) -> MtbResult<Self> {
        Ok(Self {
            inbound: compile(inbound)?,
            outbound: compile(outbound)?,
        })
    }

    pub fn from_settings(settings: &Settings) -> MtbResult<Self> {
        Self::new(&settings.sample_id_rules, &settings.sample_id_reverse_rules)
    }

    /// Portal sample id to the identifier value stored on the Specimen.
    pub fn normalize(&self, sample_id: &str) -> String {
        apply(&self.inbound, sample_id)
    }

    /// Stored identifier value back to the portal sample id.
    pub fn denormalize(&self, identifier_value: &str) -> String {
        apply(&self.outbound, identifier_value)
    }
}
