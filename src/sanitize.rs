//! Content sanitization for revisions
//!
//! Two profiles over the same engine: a strict save-time clean that runs on
//! every revision before it persists, and a richer display-time allow-list
//! for rendering stored content. Cleaning degrades content, it never fails.

use ammonia::Builder;
use std::collections::{HashMap, HashSet};

/// Tags a revision may carry into storage
const SAVE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "blockquote", "code", "em", "i", "li", "ol", "strong", "ul",
];

/// Additional tags allowed when rendering for display
const DISPLAY_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "pre", "hr", "br", "span", "div", "dl", "dt", "dd",
    "table", "thead", "tbody", "tr", "th", "td", "img", "sup", "sub", "u", "s",
];

/// Sanitizer collaborator with save and display profiles
pub struct Sanitizer {
    save: Builder<'static>,
    display: Builder<'static>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        let mut save = Builder::default();
        save.tags(SAVE_TAGS.iter().copied().collect::<HashSet<&str>>());
        save.tag_attributes(link_attributes());
        save.generic_attributes(HashSet::new());

        let mut display = Builder::default();
        let mut display_tags: HashSet<&str> = SAVE_TAGS.iter().copied().collect();
        display_tags.extend(DISPLAY_TAGS.iter().copied());
        display.tags(display_tags);
        let mut display_attrs = link_attributes();
        display_attrs.insert(
            "img",
            ["src", "alt", "title", "width", "height"]
                .into_iter()
                .collect(),
        );
        display.tag_attributes(display_attrs);
        display.generic_attributes(["class", "id", "title"].into_iter().collect());

        Self { save, display }
    }

    /// Mandatory save-time pass: strip everything outside the storage
    /// allow-list. Disallowed tags are removed, their text kept; script and
    /// style contents are dropped entirely.
    pub fn clean(&self, raw: &str) -> String {
        self.save.clean(raw).to_string()
    }

    /// Display-time pass with the richer allow-list
    pub fn render(&self, content: &str) -> String {
        self.display.clean(content).to_string()
    }
}

fn link_attributes() -> HashMap<&'static str, HashSet<&'static str>> {
    let mut attrs: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
    attrs.insert("a", ["href", "title"].into_iter().collect());
    attrs.insert("abbr", ["title"].into_iter().collect());
    attrs.insert("acronym", ["title"].into_iter().collect());
    attrs
}
