//! Headless in-memory surface.
//!
//! Content is kept as a list of text runs and child nodes. Replacing content
//! parses two markers into child nodes: component placeholders
//! (`<component data-id="…"></component>`) and rune slots
//! (`<rune data-var="…">text</rune>`). Everything else stays opaque text.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use tessel_core::ComponentId;

use super::Container;
use crate::cache::pattern;
use crate::errors::RenderError;

static MARKERS: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r#"<component data-id="([^"]*)"></component>|<rune data-var="([^"]*)">([^<]*)</rune>"#,
    )
});

const COMPONENT_TAG: &str = "component";
const RUNE_TAG: &str = "rune";

#[derive(Debug)]
enum Segment {
    Text(String),
    Node(Rc<MemoryNode>),
}

/// A headless [`Container`].
#[derive(Debug, Default)]
pub struct MemoryNode {
    tag: String,
    attributes: RefCell<BTreeMap<String, String>>,
    classes: RefCell<BTreeSet<String>>,
    children: RefCell<Vec<Segment>>,
}

impl MemoryNode {
    /// A root node.
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            tag: "root".into(),
            ..Self::default()
        })
    }

    fn element(tag: &str, attribute: (&str, &str)) -> Rc<Self> {
        let node = Self {
            tag: tag.into(),
            ..Self::default()
        };
        let _ = node
            .attributes
            .borrow_mut()
            .insert(attribute.0.into(), attribute.1.into());
        Rc::new(node)
    }

    /// Element tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The full subtree as markup, this node included.
    pub fn outer_markup(&self) -> String {
        let mut out = format!("<{}", self.tag);
        for (name, value) in self.attributes.borrow().iter() {
            let _ = write!(out, r#" {name}="{value}""#);
        }
        let classes = self.classes.borrow();
        if !classes.is_empty() {
            let joined: Vec<&str> = classes.iter().map(String::as_str).collect();
            let _ = write!(out, r#" class="{}""#, joined.join(" "));
        }
        out.push('>');
        out.push_str(&self.compose());
        let _ = write!(out, "</{}>", self.tag);
        out
    }

    /// The inner content with every descendant composed back into markup.
    pub fn compose(&self) -> String {
        self.children
            .borrow()
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.clone(),
                Segment::Node(node) => node.outer_markup(),
            })
            .collect()
    }

    fn parse(markup: &str) -> Result<Vec<Segment>, RenderError> {
        let markers = pattern(&MARKERS)?;
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in markers.captures_iter(markup) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Text(markup[last..whole.start()].to_owned()));
            }
            if let Some(id) = caps.get(1) {
                segments.push(Segment::Node(Self::element(
                    COMPONENT_TAG,
                    ("data-id", id.as_str()),
                )));
            } else if let Some(key) = caps.get(2) {
                let rune = Self::element(RUNE_TAG, ("data-var", key.as_str()));
                let text = caps.get(3).map_or("", |m| m.as_str());
                if !text.is_empty() {
                    rune.children
                        .borrow_mut()
                        .push(Segment::Text(text.to_owned()));
                }
                segments.push(Segment::Node(rune));
            }
            last = whole.end();
        }
        if last < markup.len() {
            segments.push(Segment::Text(markup[last..].to_owned()));
        }
        Ok(segments)
    }

    fn is_component(&self) -> bool {
        self.tag == COMPONENT_TAG
    }

    fn child_nodes(&self) -> Vec<Rc<MemoryNode>> {
        self.children
            .borrow()
            .iter()
            .filter_map(|segment| match segment {
                Segment::Node(node) => Some(node.clone()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    fn find_node(
        &self,
        predicate: &dyn Fn(&MemoryNode) -> bool,
        cross_components: bool,
    ) -> Option<Rc<MemoryNode>> {
        for child in self.child_nodes() {
            if predicate(&*child) {
                return Some(child);
            }
            if child.is_component() && !cross_components {
                continue;
            }
            if let Some(found) = child.find_node(predicate, cross_components) {
                return Some(found);
            }
        }
        None
    }
}

impl Container for MemoryNode {
    fn find_component(&self, component_id: &ComponentId) -> Option<Rc<dyn Container>> {
        let wanted = component_id.as_str();
        self.find_node(
            &|node| node.is_component() && node.attribute("data-id").as_deref() == Some(wanted),
            true,
        )
        .map(|node| node as Rc<dyn Container>)
    }

    fn find_slot(&self, key: &str) -> Option<Rc<dyn Container>> {
        self.find_node(
            &|node| node.tag == RUNE_TAG && node.attribute("data-var").as_deref() == Some(key),
            false,
        )
        .map(|node| node as Rc<dyn Container>)
    }

    fn replace_content(&self, markup: &str) -> Result<(), RenderError> {
        let segments = Self::parse(markup)?;
        *self.children.borrow_mut() = segments;
        Ok(())
    }

    fn append_content(&self, markup: &str) -> Result<(), RenderError> {
        let segments = Self::parse(markup)?;
        self.children.borrow_mut().extend(segments);
        Ok(())
    }

    fn content(&self) -> String {
        self.compose()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        let _ = self
            .attributes
            .borrow_mut()
            .insert(name.to_owned(), value.to_owned());
    }

    fn toggle_class(&self, class: &str, on: bool) {
        let mut classes = self.classes.borrow_mut();
        if on {
            let _ = classes.insert(class.to_owned());
        } else {
            let _ = classes.remove(class);
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.borrow().contains(class)
    }
}
