//! Collects parsed fields into guide sections.
//!
//! Fields are released for emission in the pass's logical order: a field that arrives
//! early waits until every field before it in the pass has arrived or the pass ends.
//! Fragments of one section are concatenated in pass order.

use super::plan::{FieldSpec, PassPlan};
use crate::parser::ParsedField;
use crate::types::{GenerationMode, GuideSections, SectionKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug)]
pub struct SectionAssembler {
    mode: GenerationMode,
    plans: Vec<PassPlan>,
    /// Completed field values by field name.
    fragments: HashMap<&'static str, Value>,
    /// Per pass, how many fields have been released.
    released: Vec<usize>,
}

impl SectionAssembler {
    pub fn new(mode: GenerationMode, plans: Vec<PassPlan>) -> Self {
        let released = vec![0; plans.len()];
        Self {
            mode,
            plans,
            fragments: HashMap::new(),
            released,
        }
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    /// Stores a field and returns the sections that became ready, in order.
    pub fn accept(&mut self, pass: usize, field: ParsedField) -> Vec<SectionKind> {
        let Some(spec) = self.plans.get(pass).and_then(|p| p.field(&field.key)).copied() else {
            debug!(key = %field.key, pass, "Ignoring field not requested in this pass.");
            return Vec::new();
        };
        self.fragments.insert(spec.name, field.value);
        self.release(pass, false)
    }

    /// Fills fields the stream parser missed from a whole-response parse.
    pub fn absorb(&mut self, pass: usize, parsed: Map<String, Value>) -> Vec<SectionKind> {
        let Some(plan) = self.plans.get(pass) else {
            return Vec::new();
        };
        let mut recovered = 0;
        for spec in &plan.fields {
            if self.fragments.contains_key(spec.name) {
                continue;
            }
            if let Some(value) = parsed.get(spec.name) {
                self.fragments.insert(spec.name, value.clone());
                recovered += 1;
            }
        }
        if recovered > 0 {
            debug!(pass, recovered, "Recovered fields from fallback parse.");
        }
        self.release(pass, false)
    }

    /// Releases whatever the pass produced, skipping fields that never arrived.
    pub fn finish_pass(&mut self, pass: usize) -> Vec<SectionKind> {
        self.release(pass, true)
    }

    /// Forgets the fields of a pass so it can be retried from scratch.
    pub fn discard_pass(&mut self, pass: usize) {
        if let Some(plan) = self.plans.get(pass) {
            for spec in &plan.fields {
                self.fragments.remove(spec.name);
            }
        }
        if let Some(cursor) = self.released.get_mut(pass) {
            *cursor = 0;
        }
    }

    fn release(&mut self, pass: usize, to_end: bool) -> Vec<SectionKind> {
        let (Some(plan), Some(cursor)) = (self.plans.get(pass), self.released.get_mut(pass)) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        while let Some(spec) = plan.fields.get(*cursor) {
            if self.fragments.contains_key(spec.name) {
                ready.push(spec.section);
            } else if !to_end {
                break;
            }
            *cursor += 1;
        }
        ready
    }

    fn specs_for(&self, kind: SectionKind) -> impl Iterator<Item = &FieldSpec> {
        self.plans
            .iter()
            .flat_map(|p| p.fields.iter())
            .filter(move |spec| spec.section == kind)
    }

    /// The current combined value of a section.
    pub fn section(&self, kind: SectionKind) -> Option<Value> {
        let parts: Vec<&Value> = self
            .specs_for(kind)
            .filter_map(|spec| self.fragments.get(spec.name))
            .collect();
        combine(&parts)
    }

    /// Every section with at least one fragment.
    pub fn sections(&self) -> GuideSections {
        self.mode
            .sections()
            .into_iter()
            .filter_map(|kind| self.section(kind).map(|v| (kind, v)))
            .collect()
    }

    /// Sections required by the mode that have no fragment. A section is only
    /// complete when all its fragments arrived.
    pub fn missing(&self) -> Vec<SectionKind> {
        self.mode
            .sections()
            .into_iter()
            .filter(|kind| {
                self.specs_for(*kind)
                    .any(|spec| !self.fragments.contains_key(spec.name))
            })
            .collect()
    }
}

fn combine(parts: &[&Value]) -> Option<Value> {
    match parts {
        [] => None,
        [single] => Some((*single).clone()),
        _ if parts.iter().all(|p| p.is_array()) => Some(Value::Array(
            parts
                .iter()
                .filter_map(|p| p.as_array())
                .flatten()
                .cloned()
                .collect(),
        )),
        _ => Some(Value::String(
            parts
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        )),
    }
}
