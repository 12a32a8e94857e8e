//! A wrapper around one element that indexes its children by tag.

use std::collections::HashMap;

use crate::{error::Error, xml::Element};

/// Owns an [Element] and keeps a `tag -> child positions` index in step with it.
///
/// Every mutator updates the element and the index together. If the element is
/// edited through [ElementShadow::element_mut] call [ElementShadow::reindex]
/// afterwards.
///
/// Lookups, [ElementShadow::append] and [ElementShadow::replace] are O(1)
/// amortized. [ElementShadow::insert] and [ElementShadow::remove] away from
/// the end shift later positions and cost O(n), the same as the `Vec` they
/// edit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementShadow {
    element: Element,
    index: HashMap<String, Vec<usize>>,
}

impl ElementShadow {
    pub fn new(element: Element) -> ElementShadow {
        let mut shadow = ElementShadow {
            element,
            index: HashMap::new(),
        };
        shadow.reindex();
        shadow
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Direct access for bulk edits; the tag index is stale until [Self::reindex].
    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    pub fn name(&self) -> &str {
        &self.element.name
    }

    pub fn len(&self) -> usize {
        self.element.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.element.children.is_empty()
    }

    pub fn children(&self) -> &[Element] {
        &self.element.children
    }

    pub fn child(&self, index: usize) -> Option<&Element> {
        self.element.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.element.children.get_mut(index)
    }

    /// Children with the given tag, in document order.
    pub fn children_of<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a Element> + 'a {
        self.positions_of(tag)
            .iter()
            .map(move |idx| &self.element.children[*idx])
    }

    /// Positions of children with the given tag, in document order.
    pub fn positions_of(&self, tag: &str) -> &[usize] {
        self.index.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first_of(&self, tag: &str) -> Option<&Element> {
        self.children_of(tag).next()
    }

    pub fn count_of(&self, tag: &str) -> usize {
        self.positions_of(tag).len()
    }

    pub fn append(&mut self, child: Element) {
        let position = self.element.children.len();
        self.index
            .entry(child.name.clone())
            .or_default()
            .push(position);
        self.element.children.push(child);
    }

    pub fn insert(&mut self, index: usize, child: Element) -> Result<(), Error> {
        let len = self.element.children.len();
        if index > len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        if index == len {
            self.append(child);
            return Ok(());
        }
        self.shift_from(index, 1);
        let positions = self.index.entry(child.name.clone()).or_default();
        let at = positions.partition_point(|p| *p < index);
        positions.insert(at, index);
        self.element.children.insert(index, child);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Element, Error> {
        let len = self.element.children.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let removed = self.element.children.remove(index);
        self.forget(&removed.name, index);
        self.shift_from(index + 1, -1);
        Ok(removed)
    }

    /// Swap the child at `index` for `child`, returning the old one.
    pub fn replace(&mut self, index: usize, child: Element) -> Result<Element, Error> {
        let len = self.element.children.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let old = std::mem::replace(&mut self.element.children[index], child);
        let new_name = self.element.children[index].name.clone();
        if old.name != new_name {
            self.forget(&old.name, index);
            let positions = self.index.entry(new_name).or_default();
            let at = positions.partition_point(|p| *p < index);
            positions.insert(at, index);
        }
        Ok(old)
    }

    /// Remove every child, returning them in order.
    pub fn clear(&mut self) -> Vec<Element> {
        self.index.clear();
        std::mem::take(&mut self.element.children)
    }

    /// Rebuild the tag index from the current children.
    pub fn reindex(&mut self) {
        self.index.clear();
        for (position, child) in self.element.children.iter().enumerate() {
            self.index
                .entry(child.name.clone())
                .or_default()
                .push(position);
        }
    }

    fn forget(&mut self, tag: &str, position: usize) {
        if let Some(positions) = self.index.get_mut(tag) {
            positions.retain(|p| *p != position);
            if positions.is_empty() {
                self.index.remove(tag);
            }
        }
    }

    // every indexed position >= from moves by delta
    fn shift_from(&mut self, from: usize, delta: isize) {
        for positions in self.index.values_mut() {
            for p in positions.iter_mut().filter(|p| **p >= from) {
                *p = p.wrapping_add_signed(delta);
            }
        }
    }
}

impl From<Element> for ElementShadow {
    fn from(element: Element) -> Self {
        ElementShadow::new(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(it: impl Iterator<Item = &'a Element>) -> Vec<String> {
        it.map(|e| e.text().to_string()).collect()
    }

    fn fresh_index(shadow: &ElementShadow) -> ElementShadow {
        ElementShadow::new(shadow.element().clone())
    }

    fn sample() -> ElementShadow {
        ElementShadow::new(Element::with_children(
            "glyph",
            vec![
                Element::with_text("unicode", "u1"),
                Element::with_text("anchor", "a1"),
                Element::with_text("unicode", "u2"),
                Element::with_text("anchor", "a2"),
            ],
        ))
    }

    #[test]
    fn children_by_tag() {
        let shadow = sample();
        assert_eq!(vec!["u1", "u2"], names(shadow.children_of("unicode")));
        assert_eq!(vec!["a1", "a2"], names(shadow.children_of("anchor")));
        assert_eq!(0, shadow.count_of("outline"));
        assert_eq!(Some("a1"), shadow.first_of("anchor").map(Element::text));
    }

    #[test]
    fn insert_keeps_index_in_step() {
        let mut shadow = sample();
        shadow.insert(1, Element::with_text("unicode", "u0")).unwrap();
        assert_eq!(vec!["u1", "u0", "u2"], names(shadow.children_of("unicode")));
        assert_eq!(vec!["a1", "a2"], names(shadow.children_of("anchor")));
        assert_eq!(fresh_index(&shadow), shadow);
    }

    #[test]
    fn remove_keeps_index_in_step() {
        let mut shadow = sample();
        let removed = shadow.remove(1).unwrap();
        assert_eq!("a1", removed.text());
        assert_eq!(vec!["a2"], names(shadow.children_of("anchor")));
        assert_eq!(vec!["u1", "u2"], names(shadow.children_of("unicode")));
        assert_eq!(fresh_index(&shadow), shadow);

        shadow.remove(2).unwrap();
        assert_eq!(0, shadow.count_of("anchor"));
        assert_eq!(fresh_index(&shadow), shadow);
    }

    #[test]
    fn replace_with_other_tag() {
        let mut shadow = sample();
        let old = shadow.replace(2, Element::with_text("anchor", "a1.5")).unwrap();
        assert_eq!("u2", old.text());
        assert_eq!(vec!["a1", "a1.5", "a2"], names(shadow.children_of("anchor")));
        assert_eq!(fresh_index(&shadow), shadow);
    }

    #[test]
    fn out_of_range() {
        let mut shadow = sample();
        assert!(matches!(
            shadow.remove(4),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(shadow.insert(5, Element::new("x")).is_err());
        assert!(shadow.replace(9, Element::new("x")).is_err());
        shadow.insert(4, Element::new("lib")).unwrap();
        assert_eq!(1, shadow.count_of("lib"));
    }

    #[test]
    fn reindex_after_bulk_edit() {
        let mut shadow = sample();
        shadow.element_mut().children.retain(|c| c.name == "anchor");
        shadow.reindex();
        assert_eq!(0, shadow.count_of("unicode"));
        assert_eq!(vec![0, 1], shadow.positions_of("anchor"));
    }
}
