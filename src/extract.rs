//! Chapter text extraction
//!
//! Walks a content document in document order and renders its visible text,
//! recording the chapter-local byte offset of every fragment the table of
//! contents points into.

use std::collections::{HashMap, HashSet};

use crate::{
    offset::OffsetMap,
    style::VisibilityPredicate,
    utils::{XmlElement, XmlNode},
};

/// Elements that start on a new paragraph
const BLOCK_ELEMENTS: [&str; 34] = [
    "address", "article", "aside", "blockquote", "body", "caption", "center", "dd", "details",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hgroup", "li", "main", "nav", "ol", "p", "pre", "section",
    "table", "ul",
];

/// Elements that only need a line of their own
const LINE_ELEMENTS: [&str; 2] = ["tr", "summary"];

/// Extracted text of one chapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterText {
    pub text: String,

    /// Fragment id to chapter-relative byte offset
    pub anchors: HashMap<String, usize>,
}

/// Renders the visible text of a content document
///
/// Offsets are recorded only for the fragment ids in `wanted`. A fragment is
/// placed at the start of the first visible text inside its element; an
/// element without visible text keeps the offset of its own start.
pub fn extract_chapter(
    root: &XmlElement,
    wanted: &HashSet<String>,
    visibility: &dyn VisibilityPredicate,
) -> ChapterText {
    let mut walker = TextWalker::new(wanted, visibility);
    walker.visit(root);

    let TextWalker {
        output,
        mut anchors,
        fallback,
        ..
    } = walker;

    for (id, offset) in fallback {
        anchors.entry(id).or_insert(offset);
    }

    let (text, offsets) = normalize_chapter(&output);
    let anchors = anchors
        .into_iter()
        .map(|(id, offset)| (id, offsets.map(offset).min(text.len())))
        .collect();

    ChapterText { text, anchors }
}

/// Fragment ids an element can be addressed by (`id`, and `name` on links)
fn anchor_ids(element: &XmlElement) -> impl Iterator<Item = &str> {
    let name = (element.name == "a")
        .then(|| element.attr("name"))
        .flatten();
    element.attr("id").into_iter().chain(name)
}

fn is_html_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\u{c}')
}

/// Collapses every run of markup whitespace into a single space
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if is_html_space(c) {
            if !in_space {
                result.push(' ');
            }
            in_space = true;
        } else {
            result.push(c);
            in_space = false;
        }
    }
    result
}

struct TextWalker<'a, 'w> {
    wanted: &'w HashSet<String>,
    visibility: &'w dyn VisibilityPredicate,
    ancestors: Vec<&'a XmlElement>,
    output: String,
    anchors: HashMap<String, usize>,
    fallback: HashMap<String, usize>,

    /// Wanted ids of open elements still waiting for visible text
    pending: Vec<String>,
}

impl<'a, 'w> TextWalker<'a, 'w> {
    fn new(wanted: &'w HashSet<String>, visibility: &'w dyn VisibilityPredicate) -> Self {
        Self {
            wanted,
            visibility,
            ancestors: vec![],
            output: String::new(),
            anchors: HashMap::new(),
            fallback: HashMap::new(),
            pending: vec![],
        }
    }

    fn visit(&mut self, element: &'a XmlElement) {
        if self.visibility.is_hidden(element, &self.ancestors) {
            return;
        }

        let name = element.name.as_str();
        let is_block = BLOCK_ELEMENTS.contains(&name);
        let is_line = LINE_ELEMENTS.contains(&name);
        if is_block {
            self.paragraph_break();
        } else if is_line {
            self.line_break();
        }

        let ids = self.wanted_ids(element);
        for id in &ids {
            self.fallback.entry(id.clone()).or_insert(self.output.len());
        }

        match name {
            "br" => {
                self.pop_spaces();
                self.output.push('\n');
                return;
            }
            "hr" => {
                self.pop_spaces();
                self.output.push_str("\n\n");
                return;
            }
            "ul" | "ol" => {
                self.pending.extend(ids.iter().cloned());
                self.list(element);
                self.pending.retain(|id| !ids.contains(id));
                return;
            }
            _ => {}
        }

        self.pending.extend(ids.iter().cloned());
        self.ancestors.push(element);
        for node in &element.nodes {
            match node {
                XmlNode::Text(text) => self.text(text),
                XmlNode::Element(child) => self.visit(child),
            }
        }
        self.ancestors.pop();
        self.pending.retain(|id| !ids.contains(id));

        if matches!(name, "td" | "th") && !self.output.ends_with([' ', '\n']) {
            self.output.push(' ');
        }

        if is_block {
            self.paragraph_break();
        } else if is_line {
            self.line_break();
        }
    }

    /// Wanted ids of the element that have no offset yet
    fn wanted_ids(&self, element: &XmlElement) -> Vec<String> {
        anchor_ids(element)
            .filter(|id| self.wanted.contains(*id) && !self.anchors.contains_key(*id))
            .map(str::to_string)
            .collect()
    }

    fn text(&mut self, raw: &str) {
        let collapsed = collapse_whitespace(raw);
        let mut piece = collapsed.as_str();
        if self.output.is_empty() || self.output.ends_with([' ', '\n']) {
            piece = piece.trim_start_matches(' ');
        }
        if piece.is_empty() {
            return;
        }

        let content = piece.trim_start_matches(' ');
        self.output.push_str(&piece[..piece.len() - content.len()]);
        if !content.is_empty() {
            self.record_pending();
        }
        self.output.push_str(content);
    }

    /// Gives every waiting anchor the current output position
    fn record_pending(&mut self) {
        let offset = self.output.len();
        for id in self.pending.drain(..) {
            self.anchors.entry(id).or_insert(offset);
        }
    }

    /// Renders each visible item of a list on its own line
    fn list(&mut self, list: &'a XmlElement) {
        self.ancestors.push(list);

        for item in list.children() {
            if self.visibility.is_hidden(item, &self.ancestors) {
                continue;
            }

            let mut ids = self.wanted_ids(item);
            let mut line = String::new();
            let mut ancestors = self.ancestors.clone();
            ancestors.push(item);
            InlineScope {
                walker: self,
                ancestors,
            }
            .collect(item, &mut line, &mut ids);

            let line = collapse_whitespace(&line);
            let line = line.trim_matches(' ');
            if line.is_empty() {
                for id in ids {
                    self.fallback.entry(id).or_insert(self.output.len());
                }
                continue;
            }

            self.pending.extend(ids);
            self.record_pending();
            self.output.push_str(line);
            self.output.push('\n');
        }

        self.ancestors.pop();
        self.paragraph_break();
    }

    fn pop_spaces(&mut self) {
        while self.output.ends_with(' ') {
            self.output.pop();
        }
    }

    fn line_break(&mut self) {
        self.pop_spaces();
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
    }

    /// Ensures the output ends with a blank line, without stacking them
    fn paragraph_break(&mut self) {
        self.pop_spaces();
        if self.output.is_empty() || self.output.ends_with("\n\n") {
            return;
        }

        if self.output.ends_with('\n') {
            self.output.push('\n');
        } else {
            self.output.push_str("\n\n");
        }
    }
}

/// Inline text collection below a list item, with its own ancestor chain
struct InlineScope<'s, 'a, 'w> {
    walker: &'s TextWalker<'a, 'w>,
    ancestors: Vec<&'a XmlElement>,
}

impl<'a> InlineScope<'_, 'a, '_> {
    fn collect(mut self, item: &'a XmlElement, line: &mut String, ids: &mut Vec<String>) {
        self.collect_nodes(item, line, ids);
    }

    fn collect_nodes(&mut self, element: &'a XmlElement, line: &mut String, ids: &mut Vec<String>) {
        for node in &element.nodes {
            match node {
                XmlNode::Text(text) => line.push_str(text),
                XmlNode::Element(child) => {
                    if self.walker.visibility.is_hidden(child, &self.ancestors) {
                        continue;
                    }

                    for id in self.walker.wanted_ids(child) {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }

                    if child.name == "br" {
                        line.push(' ');
                        continue;
                    }

                    // Nested blocks and lists run on within the item's line
                    let spaced = BLOCK_ELEMENTS.contains(&child.name.as_str());
                    if spaced {
                        line.push(' ');
                    }
                    self.ancestors.push(child);
                    self.collect_nodes(child, line, ids);
                    self.ancestors.pop();
                    if spaced {
                        line.push(' ');
                    }
                }
            }
        }
    }
}

/// Collapses runs of three or more newlines to two and trims the text
///
/// Returns the normalized text and the map from offsets of the input to
/// offsets of the normalized text.
pub fn normalize_chapter(text: &str) -> (String, OffsetMap) {
    let mut offsets = OffsetMap::default();
    let start = text.len() - text.trim_start_matches(is_html_space).len();
    let end = text.trim_end_matches(is_html_space).len();

    if start >= end {
        offsets.delete(0, text.len());
        return (String::new(), offsets);
    }
    if start > 0 {
        offsets.delete(0, start);
    }

    let mut output = String::with_capacity(end - start);
    let bytes = text.as_bytes();
    let mut copied = start;
    let mut position = start;
    while position < end {
        if bytes[position] != b'\n' {
            position += 1;
            continue;
        }

        let run_start = position;
        while position < end && bytes[position] == b'\n' {
            position += 1;
        }
        if position - run_start > 2 {
            output.push_str(&text[copied..run_start + 2]);
            offsets.delete(run_start + 2, position);
            copied = position;
        }
    }
    output.push_str(&text[copied..end]);

    if end < text.len() {
        offsets.delete(end, text.len());
    }

    (output, offsets)
}
