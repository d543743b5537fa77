use std::{
    collections::HashMap,
    io::{Read, Seek},
};

use percent_encoding::percent_decode_str;
use quick_xml::{NsReader, escape::unescape, events::Event};
use zip::ZipArchive;

use crate::error::EpubError;

/// HTML elements that never have content, even when written without a closing slash
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Extracts the contents of a specified file from a ZIP archive
///
/// This function reads the raw byte data of a specified file from an EPUB file (which
/// is essentially a ZIP archive). This is a fundamental utility function for handling
/// files within an EPUB (such as OPF, NCX, container files, etc.).
///
/// ## Parameters
/// - `zip_file`: A mutable reference to a ZIP archive object
/// - `file_name`: The path to the file to extract (relative to the ZIP archive root directory)
///
/// ## Return
/// - `Ok(Vec<u8>)`: Returns a byte vector containing the file data
///   if the file content was successfully read
/// - `Err(EpubError)`: The file does not exist or an error occurred during the read operation
///
/// ## Notes
/// - The returned data is raw bytes; the caller needs to perform
///   appropriate decoding based on the file type.
/// - For text files, further decoding using the `DecodeBytes` trait is usually required.
pub fn get_file_in_zip_archive<R: Read + Seek>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
) -> Result<Vec<u8>, EpubError> {
    let mut buffer = Vec::<u8>::new();
    match zip_file.by_name(file_name) {
        Ok(mut file) => {
            let _ = file.read_to_end(&mut buffer).map_err(EpubError::from)?;
            Ok(buffer)
        }
        Err(zip::result::ZipError::FileNotFound) => Err(EpubError::ResourceNotFound {
            resource: file_name.to_string(),
        }),
        Err(err) => Err(EpubError::from(err)),
    }
}

/// Normalizes an archive path, resolving `.` and `..` segments
///
/// Archive entry names always use `/` as separator and never start with one.
/// `..` segments that would climb above the archive root are dropped.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    segments.join("/")
}

/// Returns the directory part of an archive path (empty for root-level entries)
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolves a relative reference against a directory inside the archive
///
/// A reference starting with `/` is taken relative to the archive root.
pub fn join_path(base_dir: &str, href: &str) -> String {
    if let Some(absolute) = href.strip_prefix('/') {
        normalize_path(absolute)
    } else if base_dir.is_empty() {
        normalize_path(href)
    } else {
        normalize_path(&format!("{}/{}", base_dir, href))
    }
}

/// Splits an href into its document part and optional fragment
///
/// Both parts are percent-decoded. An empty fragment is reported as `None`.
pub fn split_href(href: &str) -> (String, Option<String>) {
    match href.split_once('#') {
        Some((path, fragment)) => {
            let fragment = percent_decode(fragment);
            (
                percent_decode(path),
                (!fragment.is_empty()).then_some(fragment),
            )
        }
        None => (percent_decode(href), None),
    }
}

/// Percent-decodes a URL component, replacing invalid UTF-8 sequences
pub fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().to_string()
}

/// Resolves an XML or HTML entity reference (without `&` and `;`)
///
/// Covers the five predefined XML entities, numeric character references and
/// the named HTML entities that commonly appear in e-book markup.
pub fn resolve_entity(entity: &str) -> Option<String> {
    let resolved = match entity {
        "apos" => '\'',
        "quot" => '"',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "nbsp" => '\u{a0}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "shy" => '\u{ad}',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "laquo" => '«',
        "raquo" => '»',
        "middot" => '·',
        "bull" => '•',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "deg" => '°',
        "times" => '×',
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };

            char::from_u32(code)?
        }
    };

    Some(resolved.to_string())
}

/// Provides functionality to decode byte data into strings
///
/// This trait is primarily used to decode raw byte data (such as
/// text files read from EPUB files) into a suitable string representation.
/// It supports automatic detection of multiple encoding formats,
/// including UTF-8 (with or without BOM), UTF-16 BE, and UTF-16 LE.
///
/// ## Notes
/// - When attempting to parse a byte stream lacking a BOM (Byte Order Mark), the parsing
///   results may be unreadable; caution should be exercised when using such streams.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        if self.is_empty() || self.len() < 4 {
            return Err(EpubError::EmptyDataError);
        }

        match self[0..3] {
            // Check UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, ..] => {
                String::from_utf8(self[3..].to_vec()).map_err(EpubError::from)
            }

            // Check UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Check UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Without BOM, markup in e-books is UTF-8 in practice
            _ => match String::from_utf8(self.to_vec()) {
                Ok(utf8_str) => Ok(utf8_str),
                Err(_) => Ok(String::from_utf8_lossy(self).to_string()),
            },
        }
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// This trait normalizes various sequences of whitespace characters
/// (including spaces, tabs, newlines, etc.) in a string into a single
/// whitespace character, removing leading and trailing whitespace characters.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Folds a title for comparisons that ignore case and whitespace
pub fn fold_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A node of a parsed markup tree
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Represents an element node in an XML document
///
/// Child elements and text runs are kept in document order, so mixed content
/// such as `<p>one <em>two</em> three</p>` survives parsing unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The namespace of the element
    pub namespace: Option<String>,

    /// The attributes of the element
    ///
    /// The key is the attribute name, the value is the attribute value
    pub attributes: HashMap<String, String>,

    /// Child elements and text runs in document order
    pub nodes: Vec<XmlNode>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            namespace: None,
            attributes: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    /// Gets the text content of the element and all its child elements
    ///
    /// Collects the text of all descendant text runs in document order,
    /// removing leading and trailing whitespace.
    pub fn text(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result.trim().to_string()
    }

    fn collect_text(&self, buffer: &mut String) {
        for node in &self.nodes {
            match node {
                XmlNode::Text(text) => buffer.push_str(text),
                XmlNode::Element(element) => element.collect_text(buffer),
            }
        }
    }

    /// Returns the value of the specified attribute
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    /// Returns the specified attribute without cloning it
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Checks whether a space-separated attribute contains the given token
    pub fn attr_has_token(&self, name: &str, token: &str) -> bool {
        self.attr(name).is_some_and(|value| {
            value
                .split_ascii_whitespace()
                .any(|t| t.eq_ignore_ascii_case(token))
        })
    }

    /// Find all elements with the specified name, including the element itself
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        SearchElementsByNameIter::new(self, name)
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children().filter(move |child| child.name == name)
    }

    /// Get children elements
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.nodes.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Get the element at a path of node indexes below this element
    pub fn element_at(&self, path: &[usize]) -> Option<&XmlElement> {
        let mut current = self;
        for &index in path {
            match current.nodes.get(index) {
                Some(XmlNode::Element(element)) => current = element,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Removes the nodes addressed by the given paths of node indexes
    ///
    /// Paths are relative to this element. Removal happens deepest-last-first,
    /// so removing one node never shifts the index of another path in the set.
    pub fn remove_paths(&mut self, paths: &[Vec<usize>]) {
        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();

        for path in paths.iter().rev() {
            let Some((last, parent_path)) = path.split_last() else {
                continue;
            };

            if let Some(parent) = self.element_at_mut(parent_path) {
                if *last < parent.nodes.len() {
                    parent.nodes.remove(*last);
                }
            }
        }
    }

    /// Mutable counterpart of [`XmlElement::element_at`]
    pub fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };

        match self.nodes.get_mut(*first) {
            Some(XmlNode::Element(element)) => element.element_at_mut(rest),
            _ => None,
        }
    }
}

struct SearchElementsByNameIter<'a> {
    elements: Vec<&'a XmlElement>,
    current_index: usize,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a XmlElement, name: &str) -> Self {
        let mut elements = Vec::new();
        Self::collect_elements(root, &mut elements);
        Self {
            elements,
            current_index: 0,
            target_name: name.to_string(),
        }
    }

    fn collect_elements(element: &'a XmlElement, collection: &mut Vec<&'a XmlElement>) {
        collection.push(element);
        for child in element.children() {
            Self::collect_elements(child, collection);
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_index < self.elements.len() {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            if element.name == self.target_name {
                return Some(element);
            }
        }
        None
    }
}

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses a well-formed XML document (container, package, NCX)
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(EpubError)`: An error occurred during parsing
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        Self::parse_with(content, false)
    }

    /// Parses (X)HTML content documents leniently
    ///
    /// HTML void elements are treated as empty even without a closing slash,
    /// mismatched end tags close the nearest open element of the same name
    /// (or are ignored), and unclosed elements are closed at end of input.
    pub fn parse_markup(content: &str) -> Result<XmlElement, EpubError> {
        Self::parse_with(content, true)
    }

    fn parse_with(content: &str, lenient: bool) -> Result<XmlElement, EpubError> {
        if content.is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        // Create a XML reader with namespace support
        let mut reader = NsReader::from_str(content);
        if lenient {
            reader.config_mut().check_end_names = false;
        }

        let mut buf = Vec::new();
        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;
        let mut namespace_map = HashMap::new();

        // Read XML events
        loop {
            let event = reader.read_event_into(&mut buf);
            match event {
                // End of file, stop the loop
                Ok(Event::Eof) => break,

                // Start of an element
                Ok(Event::Start(e)) => {
                    let element = Self::build_element(&e, &mut namespace_map);

                    if lenient && VOID_ELEMENTS.contains(&element.name.as_str()) {
                        Self::attach(element, &mut stack, &mut root);
                    } else {
                        stack.push(element);
                    }
                }

                // End of an element
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    let position = if lenient {
                        stack.iter().rposition(|element| element.name == name)
                    } else {
                        stack.len().checked_sub(1)
                    };

                    // An end tag without an open element is dropped
                    if let Some(position) = position {
                        while stack.len() > position {
                            if let Some(element) = stack.pop() {
                                Self::attach(element, &mut stack, &mut root);
                            }
                        }
                    }
                }

                // Self-closing element
                Ok(Event::Empty(e)) => {
                    let element = Self::build_element(&e, &mut namespace_map);
                    Self::attach(element, &mut stack, &mut root);
                }

                // Text node
                Ok(Event::Text(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    Self::push_text(&mut stack, &text);
                }

                // Entity or character reference inside text
                Ok(Event::GeneralRef(e)) => {
                    let entity = String::from_utf8_lossy(e.as_ref()).to_string();
                    match resolve_entity(&entity) {
                        Some(resolved) => Self::push_text(&mut stack, &resolved),
                        None => Self::push_text(&mut stack, &format!("&{};", entity)),
                    }
                }

                // CDATA node
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    Self::push_text(&mut stack, &text);
                }

                Err(err) => return Err(err.into()),

                // Ignore the following events (elements):
                // Comment, PI, Declaration, Doctype
                _ => {}
            }
            buf.clear();
        }

        // Close whatever the document left open
        while let Some(element) = stack.pop() {
            Self::attach(element, &mut stack, &mut root);
        }

        if let Some(element) = root.as_mut() {
            Self::assign_namespace(element, &namespace_map);
        }

        root.ok_or(EpubError::FailedParsingXml)
    }

    fn build_element(
        event: &quick_xml::events::BytesStart,
        namespace_map: &mut HashMap<String, String>,
    ) -> XmlElement {
        let name = String::from_utf8_lossy(event.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        if let Some(prefix) = event.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).to_string());
        }

        let mut attributes = event.attributes();
        attributes.with_checks(false);
        for attr in attributes.flatten() {
            let attr_key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let raw_value = String::from_utf8_lossy(&attr.value).to_string();
            let attr_value = unescape(&raw_value)
                .map(|value| value.to_string())
                .unwrap_or(raw_value);

            // Handle namespace attributes
            if attr_key == "xmlns" || attr_key.starts_with("xmlns:") {
                let attr_keys = attr_key.split(':').collect::<Vec<&str>>();
                if attr_keys.len() >= 2 {
                    namespace_map.insert(attr_keys[1].to_string(), attr_value);
                } else {
                    namespace_map.insert(attr_key, attr_value);
                }

                continue;
            }

            element.attributes.insert(attr_key, attr_value);
        }

        element
    }

    /// Hands a finished element to its parent, or makes it the root
    fn attach(element: XmlElement, stack: &mut [XmlElement], root: &mut Option<XmlElement>) {
        if let Some(parent) = stack.last_mut() {
            parent.nodes.push(XmlNode::Element(element));
        } else if root.is_none() {
            *root = Some(element);
        }
    }

    fn push_text(stack: &mut [XmlElement], text: &str) {
        let Some(element) = stack.last_mut() else {
            return;
        };

        if let Some(XmlNode::Text(last)) = element.nodes.last_mut() {
            last.push_str(text);
        } else {
            element.nodes.push(XmlNode::Text(text.to_string()));
        }
    }

    /// Assign namespace to element recursively
    ///
    /// ## Parameters
    /// - `element`: The element to assign namespace
    /// - `namespace_map`: The prefix-namespace map
    fn assign_namespace(element: &mut XmlElement, namespace_map: &HashMap<String, String>) {
        if let Some(prefix) = &element.prefix {
            if let Some(namespace) = namespace_map.get(prefix) {
                element.namespace = Some(namespace.clone());
            }
        } else if let Some(namespace) = namespace_map.get("xmlns") {
            element.namespace = Some(namespace.clone());
        }

        for node in element.nodes.iter_mut() {
            if let XmlNode::Element(child) = node {
                Self::assign_namespace(child, namespace_map);
            }
        }
    }
}
