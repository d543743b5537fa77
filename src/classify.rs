//! Page classification
//!
//! Decides for every spine document whether it is real content, content with
//! an embedded table of contents, or nothing but a table of contents.
//!
//! A *navigation context* is either an explicit navigation block (`nav`,
//! `epub:type="toc"`, `role="doc-toc"`) or, when a page has none, an implicit
//! one: an element whose id or class names it a table of contents, or a
//! directory-title heading together with the block that follows it.

use std::collections::HashSet;

use crate::{
    config::ClassifierThresholds,
    extract::extract_chapter,
    style::StyleVisibility,
    types::ChapterDecision,
    utils::{XmlElement, XmlNode, fold_title},
};

/// Headings that introduce a table of contents, in several languages
pub const DIRECTORY_TITLES: [&str; 8] = [
    "目录",
    "目錄",
    "目次",
    "contents",
    "table of contents",
    "sommaire",
    "indice",
    "índice",
];

const HEADINGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

/// Blocks that may carry the entries of a heading-introduced table of contents
const LISTING_BLOCKS: [&str; 8] = ["ul", "ol", "p", "div", "section", "table", "nav", "dl"];

/// Subtrees that never hold body text
const SKIPPED: [&str; 5] = ["script", "style", "template", "noscript", "head"];

/// Path of node indexes from the document root to a node
pub type NodePath = Vec<usize>;

/// Checks whether a title is one of the directory-title keywords
///
/// The comparison ignores case, whitespace and a trailing colon.
pub fn is_directory_title(title: &str) -> bool {
    let folded = fold_title(title);
    let folded = folded.trim_end_matches([':', '：']);

    !folded.is_empty()
        && DIRECTORY_TITLES
            .iter()
            .any(|keyword| fold_title(keyword) == folded)
}

/// Measurements the classification rules are evaluated on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    /// The page has an explicit navigation block
    pub explicit_nav: bool,

    /// The page has a heading whose text is a directory title
    pub directory_heading: bool,

    /// Links inside the page's navigation contexts
    pub link_count: usize,

    /// Links anywhere in the body
    pub body_link_count: usize,

    /// Non-whitespace characters inside navigation contexts
    pub nav_len: usize,

    /// Non-whitespace characters of the body
    pub total_len: usize,

    pub nav_ratio: f64,

    /// Non-whitespace characters outside navigation contexts
    pub non_nav_len: usize,

    /// Most links of a contents container that also holds a directory heading
    pub container_links: usize,

    /// Lines (of the first scanned ones) that repeat a known chapter title
    pub title_matches: usize,
    pub title_lines: usize,
}

/// The outcome of classifying one page
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub decision: ChapterDecision,
    pub metrics: PageMetrics,

    /// Nodes a mixed page loses before extraction
    pub removals: Vec<NodePath>,
}

impl Classification {
    /// Removes the navigation block of a mixed page
    ///
    /// `root` must be the tree the classification was computed on.
    pub fn strip(&self, root: &mut XmlElement) {
        if self.decision == ChapterDecision::Mixed {
            root.remove_paths(&self.removals);
        }
    }
}

/// Classifies a parsed content document
///
/// `known_titles` holds the folded titles of the publication's table of
/// contents; a page without links that mostly repeats them is a table of
/// contents too.
pub fn classify(
    root: &XmlElement,
    known_titles: &HashSet<String>,
    thresholds: &ClassifierThresholds,
) -> Classification {
    let mut body_path = find_path(root, "body").unwrap_or_default();
    let body = root.element_at(&body_path).unwrap_or(root);

    let mut structure = PageStructure::default();
    structure.scan(body, &mut body_path);

    let explicit_nav = !structure.explicit_navs.is_empty();
    let contexts = if explicit_nav {
        outermost(structure.explicit_navs.clone())
    } else {
        let mut implicit = structure.containers.clone();
        for (heading, blocks) in &structure.heading_blocks {
            implicit.push(heading.clone());
            implicit.extend(blocks.iter().cloned());
        }
        outermost(implicit)
    };

    let context_elements = contexts
        .iter()
        .filter_map(|path| root.element_at(path))
        .collect::<Vec<_>>();

    let mut metrics = PageMetrics {
        explicit_nav,
        directory_heading: !structure.headings.is_empty(),
        link_count: context_elements.iter().map(|e| count_links(e)).sum(),
        body_link_count: count_links(body),
        nav_len: context_elements.iter().map(|e| text_len(e)).sum(),
        total_len: text_len(body),
        ..PageMetrics::default()
    };
    metrics.non_nav_len = metrics.total_len.saturating_sub(metrics.nav_len);
    metrics.nav_ratio = if metrics.nav_len == 0 || metrics.total_len == 0 {
        0.0
    } else {
        metrics.nav_len as f64 / metrics.total_len as f64
    };
    metrics.container_links = structure
        .containers
        .iter()
        .filter(|container| {
            structure
                .headings
                .iter()
                .any(|heading| heading.starts_with(container))
        })
        .filter_map(|container| root.element_at(container))
        .map(count_links)
        .max()
        .unwrap_or(0);

    let t = thresholds;
    let mut standalone = (metrics.explicit_nav
        && metrics.link_count >= t.nav_min_links
        && metrics.nav_ratio >= t.nav_min_ratio
        && metrics.non_nav_len < t.nav_max_other_len)
        || (!metrics.explicit_nav
            && metrics.directory_heading
            && metrics.link_count >= t.heading_min_links
            && metrics.nav_ratio >= t.heading_min_ratio
            && metrics.non_nav_len < t.heading_max_other_len)
        || metrics.container_links >= t.container_min_links;

    if !standalone && metrics.body_link_count < t.sparse_max_links && metrics.directory_heading {
        let lines = title_listing_lines(root, t.title_scan_lines);
        metrics.title_lines = lines.len();
        metrics.title_matches = lines
            .iter()
            .filter(|line| known_titles.contains(&fold_title(line)))
            .count();

        let density = match metrics.title_lines {
            0 => 0.0,
            lines => metrics.title_matches as f64 / lines as f64,
        };
        standalone = metrics.title_matches >= t.title_min_matches
            && density >= t.title_min_density
            && metrics.total_len < t.title_max_body_len;
    }

    if standalone {
        return Classification {
            decision: ChapterDecision::StandaloneToc,
            metrics,
            removals: vec![],
        };
    }

    if metrics.link_count >= t.mixed_min_links {
        let mut removals = contexts;
        if explicit_nav {
            removals.extend(structure.nav_headings);
        }

        return Classification {
            decision: ChapterDecision::Mixed,
            metrics,
            removals,
        };
    }

    Classification {
        decision: ChapterDecision::Normal,
        metrics,
        removals: vec![],
    }
}

/// Locations of the navigation structures of a page
#[derive(Debug, Default)]
struct PageStructure {
    explicit_navs: Vec<NodePath>,
    containers: Vec<NodePath>,
    headings: Vec<NodePath>,
    heading_blocks: Vec<(NodePath, Vec<NodePath>)>,

    /// Directory headings directly preceding an explicit navigation block
    nav_headings: Vec<NodePath>,
}

impl PageStructure {
    fn scan(&mut self, element: &XmlElement, path: &mut NodePath) {
        self.scan_children(element, path, false);
    }

    fn scan_children(&mut self, element: &XmlElement, path: &mut NodePath, in_nav: bool) {
        for (index, node) in element.nodes.iter().enumerate() {
            let XmlNode::Element(child) = node else {
                continue;
            };
            if SKIPPED.contains(&child.name.as_str()) {
                continue;
            }

            path.push(index);

            let explicit = is_explicit_nav(child);
            if explicit && !in_nav {
                self.explicit_navs.push(path.clone());
                if let Some((previous, sibling)) = adjacent_element(element, index, Direction::Before)
                {
                    if is_directory_heading(sibling) {
                        self.nav_headings.push(sibling_path(path, previous));
                    }
                }
            } else if !in_nav && is_contents_container(child) {
                self.containers.push(path.clone());
            }

            if is_directory_heading(child) {
                self.headings.push(path.clone());
                let blocks = listing_run(element, index, path);
                if !blocks.is_empty() {
                    self.heading_blocks.push((path.clone(), blocks));
                }
            } else {
                self.scan_children(child, path, in_nav || explicit);
            }

            path.pop();
        }
    }
}

enum Direction {
    Before,
    After,
}

/// The nearest sibling element, looking past whitespace-only text
fn adjacent_element(
    parent: &XmlElement,
    index: usize,
    direction: Direction,
) -> Option<(usize, &XmlElement)> {
    let candidates: Box<dyn Iterator<Item = usize>> = match direction {
        Direction::Before => Box::new((0..index).rev()),
        Direction::After => Box::new(index + 1..parent.nodes.len()),
    };

    for candidate in candidates {
        match &parent.nodes[candidate] {
            XmlNode::Element(element) => return Some((candidate, element)),
            XmlNode::Text(text) if text.trim().is_empty() => continue,
            XmlNode::Text(_) => return None,
        }
    }

    None
}

/// The listing blocks that follow a directory heading
///
/// The first block is taken as is. Further siblings join the run while they
/// are listing blocks holding at least one link, so the run ends at the next
/// heading or at the first block of plain text.
fn listing_run(parent: &XmlElement, heading: usize, heading_path: &[usize]) -> Vec<NodePath> {
    let mut blocks = vec![];
    let mut cursor = heading;
    while let Some((next, sibling)) = adjacent_element(parent, cursor, Direction::After) {
        if !LISTING_BLOCKS.contains(&sibling.name.as_str())
            || (!blocks.is_empty() && count_links(sibling) == 0)
        {
            break;
        }

        blocks.push(sibling_path(heading_path, next));
        cursor = next;
    }
    blocks
}

fn sibling_path(path: &[usize], index: usize) -> NodePath {
    let mut sibling = path.to_vec();
    if let Some(last) = sibling.last_mut() {
        *last = index;
    }
    sibling
}

fn is_explicit_nav(element: &XmlElement) -> bool {
    element.name == "nav"
        || element.attr_has_token("epub:type", "toc")
        || element.attr("role") == Some("doc-toc")
}

/// An element whose id or class marks it as a table of contents
fn is_contents_container(element: &XmlElement) -> bool {
    ["id", "class"]
        .iter()
        .filter_map(|name| element.attr(name))
        .flat_map(|value| value.split(|c: char| !c.is_alphanumeric()))
        .any(|part| {
            matches!(
                part.to_lowercase().as_str(),
                "toc" | "contents" | "tableofcontents"
            )
        })
}

fn is_directory_heading(element: &XmlElement) -> bool {
    HEADINGS.contains(&element.name.as_str()) && is_directory_title(&element.text())
}

/// Keeps the paths that are not inside another path of the set
fn outermost(mut paths: Vec<NodePath>) -> Vec<NodePath> {
    paths.sort();
    paths.dedup();

    let mut kept: Vec<NodePath> = Vec::with_capacity(paths.len());
    for path in paths {
        if !kept.iter().any(|outer| path.starts_with(outer)) {
            kept.push(path);
        }
    }
    kept
}

fn find_path(element: &XmlElement, name: &str) -> Option<NodePath> {
    if element.name == name {
        return Some(vec![]);
    }

    element
        .nodes
        .iter()
        .enumerate()
        .find_map(|(index, node)| match node {
            XmlNode::Element(child) => find_path(child, name).map(|mut path| {
                path.insert(0, index);
                path
            }),
            XmlNode::Text(_) => None,
        })
}

fn count_links(element: &XmlElement) -> usize {
    if SKIPPED.contains(&element.name.as_str()) {
        return 0;
    }

    let own = usize::from(element.name == "a" && element.attributes.contains_key("href"));
    own + element.children().map(count_links).sum::<usize>()
}

/// Counts the non-whitespace characters of the element's text
fn text_len(element: &XmlElement) -> usize {
    if SKIPPED.contains(&element.name.as_str()) {
        return 0;
    }

    element
        .nodes
        .iter()
        .map(|node| match node {
            XmlNode::Text(text) => text.chars().filter(|c| !c.is_whitespace()).count(),
            XmlNode::Element(child) => text_len(child),
        })
        .sum()
}

/// The first non-empty lines of the page as it would be extracted
fn title_listing_lines(root: &XmlElement, limit: usize) -> Vec<String> {
    let chapter = extract_chapter(root, &HashSet::new(), &StyleVisibility::default());
    chapter
        .text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}
