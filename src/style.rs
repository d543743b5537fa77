//! Author-style-aware visibility
//!
//! Text extraction only needs to know whether an element is rendered at all.
//! [`StyleVisibility`] answers that from the element itself (hidden elements,
//! `hidden` and `aria-hidden` attributes) and from the author stylesheets of
//! the document (`display: none`, `visibility: hidden`, `opacity: 0`).
//!
//! Only a subset of selectors is understood: type, universal, class, id and
//! attribute selectors joined by descendant or child combinators. Rules whose
//! selectors use anything else are skipped, as are at-rules.

use cssparser::{
    AtRuleParser, CowRcStr, DeclarationParser, ParseError, Parser, ParserInput, ParserState,
    QualifiedRuleParser, RuleBodyItemParser, RuleBodyParser, StyleSheetParser, Token,
};

use crate::utils::XmlElement;

/// Elements that never produce visible text
const HIDDEN_ELEMENTS: [&str; 7] = [
    "script", "style", "template", "noscript", "head", "title", "svg",
];

/// Decides whether an element of a content document is rendered
pub trait VisibilityPredicate {
    /// Returns `true` if the element and its subtree are not rendered
    ///
    /// `ancestors` lists the element's ancestors from the document root down to
    /// its parent.
    fn is_hidden(&self, element: &XmlElement, ancestors: &[&XmlElement]) -> bool;
}

/// Visibility computed from element semantics and author styles
#[derive(Debug, Default, Clone)]
pub struct StyleVisibility {
    stylesheet: Stylesheet,
}

impl StyleVisibility {
    pub fn new(stylesheet: Stylesheet) -> Self {
        Self { stylesheet }
    }
}

impl VisibilityPredicate for StyleVisibility {
    fn is_hidden(&self, element: &XmlElement, ancestors: &[&XmlElement]) -> bool {
        if HIDDEN_ELEMENTS.contains(&element.name.as_str())
            || element.attributes.contains_key("hidden")
            || element
                .attr("aria-hidden")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
        {
            return true;
        }

        self.stylesheet.hides(element, ancestors)
    }
}

/// The visibility-related rules of a document's stylesheets
#[derive(Debug, Default, Clone)]
pub struct Stylesheet {
    rules: Vec<StyleRule>,
}

impl Stylesheet {
    /// Parse a CSS stylesheet from a string
    pub fn parse(css: &str) -> Self {
        let mut stylesheet = Self::default();
        stylesheet.add(css);
        stylesheet
    }

    /// Appends the rules of another stylesheet; later rules win ties
    pub fn add(&mut self, css: &str) {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);

        let mut rule_parser = TopLevelRuleParser {
            rules: &mut self.rules,
        };
        let stylesheet_parser = StyleSheetParser::new(&mut parser, &mut rule_parser);

        for result in stylesheet_parser {
            // Lenient parsing, broken rules are skipped
            let _ = result;
        }
    }

    /// Collects the author styles of a content document in document order
    ///
    /// `<style>` blocks are read from the tree; for every
    /// `<link rel="stylesheet">` the `linked` callback receives the raw href
    /// and returns the stylesheet text, if it can be found.
    pub fn from_document<F>(root: &XmlElement, mut linked: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut stylesheet = Self::default();
        stylesheet.collect(root, &mut linked);
        stylesheet
    }

    fn collect<F>(&mut self, element: &XmlElement, linked: &mut F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        match element.name.as_str() {
            "style" => self.add(&element.text()),
            "link" if element.attr_has_token("rel", "stylesheet") => {
                if let Some(css) = element.attr("href").and_then(|href| linked(href)) {
                    self.add(&css);
                }
            }
            _ => {
                for child in element.children() {
                    self.collect(child, linked);
                }
            }
        }
    }

    /// Number of rules that carry a visibility-related declaration
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Computes whether the cascade hides the element
    ///
    /// For each of `display`, `visibility` and `opacity` the winning declaration
    /// is chosen by importance, then inline over stylesheet, then specificity,
    /// then source order.
    pub fn hides(&self, element: &XmlElement, ancestors: &[&XmlElement]) -> bool {
        let inline = element
            .attr("style")
            .map(parse_inline_declarations)
            .unwrap_or_default();
        if self.rules.is_empty() && inline.is_empty() {
            return false;
        }

        let mut winners: [Option<(CascadeKey, bool)>; 3] = [None, None, None];
        let mut consider = |declaration: &Declaration, key: CascadeKey| {
            let slot = &mut winners[declaration.property as usize];
            if slot.is_none_or(|(current, _)| key >= current) {
                *slot = Some((key, declaration.hides));
            }
        };

        for (order, rule) in self.rules.iter().enumerate() {
            let Some(specificity) = rule
                .selectors
                .iter()
                .filter(|selector| selector.matches(element, ancestors))
                .map(Selector::specificity)
                .max()
            else {
                continue;
            };

            for declaration in &rule.declarations {
                consider(
                    declaration,
                    (declaration.important, false, specificity, order),
                );
            }
        }

        for (order, declaration) in inline.iter().enumerate() {
            consider(
                declaration,
                (declaration.important, true, Specificity::default(), order),
            );
        }

        winners.iter().flatten().any(|(_, hides)| *hides)
    }
}

/// (important, inline, specificity, source order)
type CascadeKey = (bool, bool, Specificity, usize);

#[derive(Debug, Clone)]
struct StyleRule {
    selectors: Vec<Selector>,
    declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Display = 0,
    Visibility = 1,
    Opacity = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Declaration {
    property: Property,
    hides: bool,
    important: bool,
}

/// CSS specificity: (ids, classes and attributes, types)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(u16, u16, u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOperator {
    Exists,
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    operator: AttrOperator,
    value: String,
}

impl AttrSelector {
    fn matches(&self, element: &XmlElement) -> bool {
        let Some(actual) = element.attr(&self.name) else {
            return false;
        };
        let expected = self.value.as_str();

        match self.operator {
            AttrOperator::Exists => true,
            AttrOperator::Equals => actual == expected,
            AttrOperator::Includes => actual.split_ascii_whitespace().any(|t| t == expected),
            AttrOperator::DashMatch => {
                actual == expected || actual.starts_with(&format!("{}-", expected))
            }
            AttrOperator::Prefix => !expected.is_empty() && actual.starts_with(expected),
            AttrOperator::Suffix => !expected.is_empty() && actual.ends_with(expected),
            AttrOperator::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttrSelector>,
}

impl Compound {
    fn matches(&self, element: &XmlElement) -> bool {
        if let Some(tag) = &self.tag {
            if !element.name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        self.ids.iter().all(|id| element.attr("id") == Some(id.as_str()))
            && self
                .classes
                .iter()
                .all(|class| element.attr_has_token("class", class))
            && self.attributes.iter().all(|attr| attr.matches(element))
    }
}

/// A complex selector; each compound carries the combinator to its left neighbour
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selector {
    parts: Vec<(Combinator, Compound)>,
}

impl Selector {
    fn matches(&self, element: &XmlElement, ancestors: &[&XmlElement]) -> bool {
        !self.parts.is_empty() && self.matches_from(self.parts.len() - 1, element, ancestors)
    }

    fn matches_from(&self, index: usize, element: &XmlElement, ancestors: &[&XmlElement]) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(element) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match combinator {
            Combinator::Child => ancestors
                .split_last()
                .is_some_and(|(parent, rest)| self.matches_from(index - 1, parent, rest)),
            Combinator::Descendant => (0..ancestors.len())
                .rev()
                .any(|i| self.matches_from(index - 1, ancestors[i], &ancestors[..i])),
        }
    }

    fn specificity(&self) -> Specificity {
        self.parts
            .iter()
            .fold(Specificity::default(), |Specificity(a, b, c), (_, compound)| {
                Specificity(
                    a + compound.ids.len() as u16,
                    b + (compound.classes.len() + compound.attributes.len()) as u16,
                    c + u16::from(compound.tag.is_some()),
                )
            })
    }
}

/// Accumulates the tokens of one comma-separated selector list
#[derive(Default)]
struct SelectorBuilder {
    parts: Vec<(Combinator, Compound)>,
    compound: Option<(Combinator, Compound)>,
    pending: Option<Combinator>,
    invalid: bool,
}

impl SelectorBuilder {
    fn compound(&mut self) -> &mut Compound {
        let pending = &mut self.pending;
        &mut self
            .compound
            .get_or_insert_with(|| {
                let combinator = pending.take().unwrap_or(Combinator::Descendant);
                (combinator, Compound::default())
            })
            .1
    }

    fn flush(&mut self) -> bool {
        match self.compound.take() {
            Some(part) => {
                self.parts.push(part);
                true
            }
            None => false,
        }
    }

    fn whitespace(&mut self) {
        if self.flush() && self.pending.is_none() {
            self.pending = Some(Combinator::Descendant);
        }
    }

    fn child(&mut self) {
        self.flush();
        if self.parts.is_empty() {
            self.invalid = true;
        }
        self.pending = Some(Combinator::Child);
    }

    fn finish(&mut self, selectors: &mut Vec<Selector>) {
        self.flush();
        let dangling = self.pending == Some(Combinator::Child);
        let parts = std::mem::take(&mut self.parts);
        if !self.invalid && !dangling && !parts.is_empty() {
            selectors.push(Selector { parts });
        }

        *self = Self::default();
    }
}

fn parse_selector_list<'i>(input: &mut Parser<'i, '_>) -> Vec<Selector> {
    let mut selectors = Vec::new();
    let mut builder = SelectorBuilder::default();

    loop {
        let token = match input.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::WhiteSpace(_) | Token::Comment(_) => builder.whitespace(),
            Token::Comma => builder.finish(&mut selectors),
            Token::Ident(name) => {
                let compound = builder.compound();
                if compound.tag.is_some() {
                    builder.invalid = true;
                } else {
                    compound.tag = Some(name.to_ascii_lowercase());
                }
            }
            Token::Delim('*') => {
                builder.compound();
            }
            Token::Delim('.') => match input.next_including_whitespace() {
                Ok(Token::Ident(class)) => {
                    let class = class.to_string();
                    builder.compound().classes.push(class);
                }
                _ => builder.invalid = true,
            },
            Token::IDHash(id) => builder.compound().ids.push(id.to_string()),
            Token::Delim('>') => builder.child(),
            Token::SquareBracketBlock => {
                match input.parse_nested_block(|nested| parse_attribute_selector(nested)) {
                    Ok(attribute) => builder.compound().attributes.push(attribute),
                    Err(_) => builder.invalid = true,
                }
            }
            _ => builder.invalid = true,
        }
    }

    builder.finish(&mut selectors);
    selectors
}

fn parse_attribute_selector<'i>(
    input: &mut Parser<'i, '_>,
) -> Result<AttrSelector, ParseError<'i, ()>> {
    let name = input.expect_ident()?.to_ascii_lowercase();
    if input.is_exhausted() {
        return Ok(AttrSelector {
            name,
            operator: AttrOperator::Exists,
            value: String::new(),
        });
    }

    let operator = match input.next()?.clone() {
        Token::Delim('=') => AttrOperator::Equals,
        Token::IncludeMatch => AttrOperator::Includes,
        Token::DashMatch => AttrOperator::DashMatch,
        Token::PrefixMatch => AttrOperator::Prefix,
        Token::SuffixMatch => AttrOperator::Suffix,
        Token::SubstringMatch => AttrOperator::Substring,
        _ => return Err(input.new_custom_error(())),
    };
    let value = input.expect_ident_or_string()?.to_string();

    Ok(AttrSelector {
        name,
        operator,
        value,
    })
}

fn parse_inline_declarations(style: &str) -> Vec<Declaration> {
    let mut input = ParserInput::new(style);
    let mut parser = Parser::new(&mut input);
    let mut declarations = Vec::new();
    let mut decl_parser = DeclarationListParser {
        declarations: &mut declarations,
    };

    for result in RuleBodyParser::new(&mut parser, &mut decl_parser) {
        let _ = result;
    }

    declarations
}

/// Parser for top-level stylesheet rules.
struct TopLevelRuleParser<'a> {
    rules: &'a mut Vec<StyleRule>,
}

// At-rules (@media, @font-face, ...) are skipped by the default implementation
impl<'i> AtRuleParser<'i> for TopLevelRuleParser<'_> {
    type Prelude = ();
    type AtRule = ();
    type Error = ();
}

impl<'i> QualifiedRuleParser<'i> for TopLevelRuleParser<'_> {
    type Prelude = Vec<Selector>;
    type QualifiedRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Ok(parse_selector_list(input))
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        let mut declarations = Vec::new();
        let mut decl_parser = DeclarationListParser {
            declarations: &mut declarations,
        };

        for result in RuleBodyParser::new(input, &mut decl_parser) {
            let _ = result;
        }

        if !prelude.is_empty() && !declarations.is_empty() {
            self.rules.push(StyleRule {
                selectors: prelude,
                declarations,
            });
        }

        Ok(())
    }
}

struct DeclarationListParser<'a> {
    declarations: &'a mut Vec<Declaration>,
}

impl<'i> AtRuleParser<'i> for DeclarationListParser<'_> {
    type Prelude = ();
    type AtRule = ();
    type Error = ();
}

impl<'i> QualifiedRuleParser<'i> for DeclarationListParser<'_> {
    type Prelude = ();
    type QualifiedRule = ();
    type Error = ();
}

impl<'i> DeclarationParser<'i> for DeclarationListParser<'_> {
    type Declaration = ();
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let mut tokens = Vec::new();
        while let Ok(token) = input.next() {
            tokens.push(token.clone());
        }

        let important = matches!(
            tokens.as_slice(),
            [.., Token::Delim('!'), Token::Ident(word)] if word.eq_ignore_ascii_case("important")
        );

        let property = match name.to_ascii_lowercase().as_str() {
            "display" => Property::Display,
            "visibility" => Property::Visibility,
            "opacity" => Property::Opacity,
            _ => return Ok(()),
        };

        let hides = match (property, tokens.first()) {
            (Property::Display, Some(Token::Ident(value))) => value.eq_ignore_ascii_case("none"),
            (Property::Visibility, Some(Token::Ident(value))) => {
                value.eq_ignore_ascii_case("hidden") || value.eq_ignore_ascii_case("collapse")
            }
            (Property::Opacity, Some(Token::Number { value, .. })) => *value <= 0.0,
            (Property::Opacity, Some(Token::Percentage { unit_value, .. })) => *unit_value <= 0.0,
            _ => false,
        };

        self.declarations.push(Declaration {
            property,
            hides,
            important,
        });

        Ok(())
    }
}

impl<'i> RuleBodyItemParser<'i, (), ()> for DeclarationListParser<'_> {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        false
    }
}
