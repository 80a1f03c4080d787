//! Tool Registry (§4.1): turns a set of declared descriptors plus a filter
//! specification into the immutable *active set* exposed to clients.

mod descriptor;
mod preset;

pub use descriptor::{AuthMode, Classification, ToolDescriptor, UpstreamBinding};
pub use preset::Preset;

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// One element of a filter specification (§4.1).
#[derive(Debug, Clone)]
pub enum Selector {
    /// Matches every descriptor.
    All,
    /// Exact tool name.
    Literal(String),
    /// `prefix.*` glob.
    Prefix(String),
    /// Expands to the preset's own selector list.
    Preset(String),
}

impl Selector {
    fn matches_name(&self, name: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Literal(n) => n == name,
            Selector::Prefix(p) => name.starts_with(p.as_str()),
            Selector::Preset(_) => false,
        }
    }
}

/// Ordered inclusion selectors, an optional exclusion list, and the presets
/// available to resolve `Selector::Preset` entries.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub include: Vec<Selector>,
    pub exclude: Vec<Selector>,
}

impl FilterSpec {
    pub fn new(include: Vec<Selector>) -> Self {
        Self {
            include,
            exclude: Vec::new(),
        }
    }

    pub fn with_exclude(mut self, exclude: Vec<Selector>) -> Self {
        self.exclude = exclude;
        self
    }
}

/// The immutable, insertion-ordered mapping from tool name to descriptor
/// produced by filter composition. Finalized once at startup (§4.1, §5).
#[derive(Debug, Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    by_name: HashMap<String, ToolDescriptor>,
    presets: HashMap<String, Preset>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// `list()` — metadata only, no upstream binding leaked.
    pub fn list(&self) -> Vec<ToolSummary<'_>> {
        self.order
            .iter()
            .map(|name| {
                let d = &self.by_name[name];
                ToolSummary {
                    name: &d.name,
                    description: &d.description,
                    input_schema: &d.input_schema,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct ToolSummary<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub input_schema: &'a serde_json::Value,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    declared: Vec<ToolDescriptor>,
    presets: HashMap<String, Preset>,
}

impl ToolRegistryBuilder {
    pub fn declare(mut self, descriptor: ToolDescriptor) -> Self {
        self.declared.push(descriptor);
        self
    }

    pub fn declare_all(mut self, descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        self.declared.extend(descriptors);
        self
    }

    pub fn preset(mut self, preset: Preset) -> Self {
        self.presets.insert(preset.name.clone(), preset);
        self
    }

    /// Resolves `filter` against the declared descriptors and finalizes
    /// the active set. `UnknownPreset` and `NoToolsMatched` are fatal per
    /// §4.1.
    pub fn finalize(self, filter: &FilterSpec) -> CoreResult<ToolRegistry> {
        let mut expanded_include = Vec::new();
        for sel in &filter.include {
            match sel {
                Selector::Preset(name) => {
                    let preset = self
                        .presets
                        .get(name)
                        .ok_or_else(|| CoreError::NotFound(format!("unknown preset `{name}`")))?;
                    expanded_include.extend(preset.selectors.iter().cloned());
                }
                other => expanded_include.push(other.clone()),
            }
        }

        let mut expanded_exclude = Vec::new();
        for sel in &filter.exclude {
            match sel {
                Selector::Preset(name) => {
                    let preset = self
                        .presets
                        .get(name)
                        .ok_or_else(|| CoreError::NotFound(format!("unknown preset `{name}`")))?;
                    expanded_exclude.extend(preset.selectors.iter().cloned());
                }
                other => expanded_exclude.push(other.clone()),
            }
        }

        let mut order = Vec::new();
        let mut by_name = HashMap::new();

        // Declared order defines the insertion order of the active set.
        for descriptor in &self.declared {
            let included = expanded_include
                .iter()
                .any(|sel| sel.matches_name(&descriptor.name));
            if !included {
                continue;
            }
            let excluded = expanded_exclude
                .iter()
                .any(|sel| sel.matches_name(&descriptor.name));
            if excluded {
                continue;
            }
            if by_name
                .insert(descriptor.name.clone(), descriptor.clone())
                .is_none()
            {
                order.push(descriptor.name.clone());
            }
        }

        if order.is_empty() {
            return Err(CoreError::NotFound(
                "no tools matched the filter specification".into(),
            ));
        }

        Ok(ToolRegistry {
            order,
            by_name,
            presets: self.presets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} does a thing"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            classification: Classification::Read,
            auth_modes: vec![AuthMode::Tenant],
            binding: UpstreamBinding::opaque(name),
        }
    }

    #[test]
    fn literal_and_prefix_selectors_compose() {
        let registry = ToolRegistry::builder()
            .declare(descriptor("user.get"))
            .declare(descriptor("user.update"))
            .declare(descriptor("message.create"))
            .finalize(&FilterSpec::new(vec![
                Selector::Literal("message.create".into()),
                Selector::Prefix("user.".into()),
            ]))
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("user.get"));
        assert!(registry.contains("message.create"));
    }

    #[test]
    fn exclusion_applies_after_inclusion() {
        let registry = ToolRegistry::builder()
            .declare(descriptor("user.get"))
            .declare(descriptor("user.delete"))
            .finalize(
                &FilterSpec::new(vec![Selector::Prefix("user.".into())])
                    .with_exclude(vec![Selector::Literal("user.delete".into())]),
            )
            .unwrap();

        assert!(registry.contains("user.get"));
        assert!(!registry.contains("user.delete"));
    }

    #[test]
    fn unknown_preset_is_fatal() {
        let err = ToolRegistry::builder()
            .declare(descriptor("user.get"))
            .finalize(&FilterSpec::new(vec![Selector::Preset("missing".into())]))
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotFound);
    }

    #[test]
    fn empty_match_is_fatal() {
        let err = ToolRegistry::builder()
            .declare(descriptor("user.get"))
            .finalize(&FilterSpec::new(vec![Selector::Literal("nope".into())]))
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotFound);
    }

    #[test]
    fn filter_composition_is_idempotent() {
        let build = || {
            ToolRegistry::builder()
                .declare(descriptor("user.get"))
                .declare(descriptor("user.update"))
                .finalize(&FilterSpec::new(vec![Selector::All]))
                .unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a.list().len(), b.list().len());
        assert_eq!(
            a.list().iter().map(|t| t.name).collect::<Vec<_>>(),
            b.list().iter().map(|t| t.name).collect::<Vec<_>>()
        );
    }
}
