//! Context stack: the ordered elements visible to an executing state.

use shipyard_types::element::{ContextElement, ElementType};

/// Stack of context elements, newest on top.
///
/// Each instance owns a snapshot of its stack. Children start from a copy of
/// the parent's stack, so a push in one branch never leaks into a sibling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStack {
    /// Bottom first.
    elements: Vec<ContextElement>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: ContextElement) {
        self.elements.push(element);
    }

    pub fn extend(&mut self, elements: impl IntoIterator<Item = ContextElement>) {
        self.elements.extend(elements);
    }

    /// Topmost element of the given type.
    pub fn get(&self, element_type: ElementType) -> Option<&ContextElement> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.element_type() == element_type)
    }

    /// Every element of the given type, top first.
    pub fn get_all(&self, element_type: ElementType) -> Vec<&ContextElement> {
        self.elements
            .iter()
            .rev()
            .filter(|e| e.element_type() == element_type)
            .collect()
    }

    /// Topmost element of the given type with the given name.
    pub fn get_named(&self, element_type: ElementType, name: &str) -> Option<&ContextElement> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.element_type() == element_type && e.name == name)
    }

    /// Iterate top first.
    pub fn iter(&self) -> impl Iterator<Item = &ContextElement> {
        self.elements.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Snapshot suitable for persisting on an instance (bottom first).
    pub fn into_vec(self) -> Vec<ContextElement> {
        self.elements
    }

    pub fn as_slice(&self) -> &[ContextElement] {
        &self.elements
    }
}

impl From<Vec<ContextElement>> for ContextStack {
    fn from(elements: Vec<ContextElement>) -> Self {
        Self { elements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::element::{ElementKind, ServiceElement};

    fn service(name: &str) -> ContextElement {
        ContextElement::new(
            name,
            ElementKind::Service(ServiceElement {
                id: format!("svc-{name}"),
                name: name.to_string(),
            }),
        )
    }

    #[test]
    fn get_returns_most_recent_push() {
        let mut stack = ContextStack::new();
        stack.push(service("api"));
        stack.push(service("web"));
        assert_eq!(stack.get(ElementType::Service).unwrap().name, "web");
        assert!(stack.get(ElementType::Phase).is_none());
    }

    #[test]
    fn get_all_is_top_first() {
        let mut stack = ContextStack::new();
        stack.extend([service("a"), service("b"), service("c")]);
        let names: Vec<_> = stack
            .get_all(ElementType::Service)
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn get_named_finds_older_element() {
        let mut stack = ContextStack::new();
        stack.extend([service("a"), service("b")]);
        assert_eq!(
            stack.get_named(ElementType::Service, "a").unwrap().name,
            "a"
        );
        assert!(stack.get_named(ElementType::Service, "z").is_none());
    }

    #[test]
    fn copies_are_independent() {
        let mut parent = ContextStack::from(vec![service("a")]);
        let mut child = parent.clone();
        child.push(service("child-only"));
        parent.push(service("parent-only"));
        assert!(parent.get_named(ElementType::Service, "child-only").is_none());
        assert!(child.get_named(ElementType::Service, "parent-only").is_none());
        assert_eq!(child.len(), 2);
    }
}
