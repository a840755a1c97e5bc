//! Flattened view of the application's UI as returned by one snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque reference the remote page assigned to an element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One element of interest captured by a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSnapshot {
    pub handle: ElementRef,

    /// Lowercase tag name
    pub tag: String,

    pub id: Option<String>,

    pub classes: Vec<String>,

    /// Visible text, trimmed
    pub text: String,

    pub input_type: Option<String>,

    pub placeholder: Option<String>,

    /// `aria-label` or the text of an associated `<label>`
    pub label: Option<String>,

    pub title: Option<String>,

    pub role: Option<String>,

    pub value: Option<String>,

    pub disabled: bool,

    pub visible: bool,

    /// Percentage carried by progress markup (`<progress>`, `role=progressbar`,
    /// or a width-styled progress fill)
    pub progress: Option<f64>,

    /// Enclosing dialog, if any
    pub container: Option<ElementRef>,

    /// Heading text, only set on dialog-like elements
    pub dialog_title: Option<String>,

    /// Remaining attributes (`data-*`, framework bindings, ...)
    pub attributes: BTreeMap<String, String>,
}

impl ElementSnapshot {
    pub fn is_dialog(&self) -> bool {
        self.tag == "dialog"
            || matches!(self.role.as_deref(), Some("dialog") | Some("alertdialog"))
            || self.dialog_title.is_some()
    }

    pub fn is_button(&self) -> bool {
        self.tag == "button"
            || self.role.as_deref() == Some("button")
            || matches!(
                self.input_type.as_deref(),
                Some("button") | Some("submit")
            ) && self.tag == "input"
    }

    pub fn has_class(&self, needle: &str) -> bool {
        self.classes
            .iter()
            .any(|c| c.to_ascii_lowercase().contains(needle))
    }

    /// Lowercased text, placeholder, label, title and class names joined for
    /// keyword matching.
    pub fn haystack(&self) -> String {
        let mut parts: Vec<&str> = vec![self.text.as_str()];
        parts.extend(self.placeholder.as_deref());
        parts.extend(self.label.as_deref());
        parts.extend(self.title.as_deref());
        parts.extend(self.classes.iter().map(String::as_str));
        parts.join(" ").to_lowercase()
    }
}

/// Result of one snapshot query, in document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiSnapshot {
    pub elements: Vec<ElementSnapshot>,
}

impl UiSnapshot {
    pub fn new(elements: Vec<ElementSnapshot>) -> Self {
        Self { elements }
    }

    pub fn visible(&self) -> impl Iterator<Item = &ElementSnapshot> {
        self.elements.iter().filter(|e| e.visible)
    }

    pub fn dialogs(&self) -> impl Iterator<Item = &ElementSnapshot> {
        self.visible().filter(|e| e.is_dialog())
    }

    pub fn get(&self, handle: &ElementRef) -> Option<&ElementSnapshot> {
        self.elements.iter().find(|e| &e.handle == handle)
    }

    /// Visible elements, optionally restricted to one container.
    pub fn scoped(
        &self,
        container: Option<&ElementRef>,
    ) -> impl Iterator<Item = &ElementSnapshot> + '_ {
        let container = container.cloned();
        self.visible()
            .filter(move |e| container.as_ref().map_or(true, |c| e.container.as_ref() == Some(c)))
    }
}
