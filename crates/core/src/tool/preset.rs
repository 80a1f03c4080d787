use super::Selector;

/// A named group of selectors that expands into tool names (§3, GLOSSARY).
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub selectors: Vec<Selector>,
}

impl Preset {
    pub fn new(name: impl Into<String>, selectors: Vec<Selector>) -> Self {
        Self {
            name: name.into(),
            selectors,
        }
    }
}
