//! Arena DOM with a small CSS engine
//!
//! Supports compound selectors (`tag`, `#id`, `.class`, `[attr]`,
//! `[attr="value"]`, `:not(.class)`) joined by the descendant combinator.
//! Selector text is tokenized by `cssparser`.
//!
//! Slots of detached subtrees are recycled by later appends, so a
//! re-rendered table body does not grow the arena.

use std::collections::{BTreeMap, HashSet};

use cssparser::{ParseError, Parser, ParserInput, Token};

use crate::driver::normalize;
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    tag: String,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    hidden: bool,
}

impl Node {
    fn new(parent: Option<NodeId>, tag: &str) -> Self {
        Self {
            parent,
            children: Vec::new(),
            tag: tag.to_ascii_lowercase(),
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            text: String::new(),
            hidden: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    nodes: Vec<Node>,
    /// Slots released by `clear_children`
    free: Vec<NodeId>,
}

impl Dom {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, "html")],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn append(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let node = Node::new(Some(parent), tag);
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        };
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Slots in the arena, live or free
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Append an element carrying only text
    pub fn append_text(&mut self, parent: NodeId, tag: &str, text: &str) -> NodeId {
        let id = self.append(parent, tag);
        self.nodes[id.0].text = text.to_string();
        id
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        let classes = &mut self.nodes[id.0].classes;
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.nodes[id.0].classes.iter().any(|c| c == class)
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        self.nodes[id.0]
            .attrs
            .insert(key.to_string(), value.to_string());
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<String> {
        let node = &self.nodes[id.0];
        if key == "class" {
            return (!node.classes.is_empty()).then(|| node.classes.join(" "));
        }
        node.attrs.get(key).cloned()
    }

    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) {
        self.nodes[id.0].hidden = hidden;
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.nodes[id.0].tag
    }

    /// Detach every child of `id` and release their subtrees
    pub fn clear_children(&mut self, id: NodeId) {
        let mut stack = std::mem::take(&mut self.nodes[id.0].children);
        while let Some(next) = stack.pop() {
            let node = &mut self.nodes[next.0];
            node.parent = None;
            stack.append(&mut node.children);
            self.free.push(next);
        }
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id.0].parent, move |p| self.nodes[p.0].parent)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root() || self.ancestors(id).any(|a| a == self.root())
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        self.is_attached(id)
            && !self.nodes[id.0].hidden
            && self.ancestors(id).all(|a| !self.nodes[a.0].hidden)
    }

    /// `id` itself or one of its descendants
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }

    /// Nearest node, starting at `id`, that satisfies `pred`
    pub fn closest(&self, id: NodeId, pred: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        std::iter::once(id).chain(self.ancestors(id)).find(|n| pred(*n))
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = self.nodes[id.0].text.clone();
        for child in &self.nodes[id.0].children {
            out.push_str(&self.text_content(*child));
        }
        out
    }

    /// `id` or a descendant has exactly `expected` as its text
    pub fn has_exact_text(&self, id: NodeId, expected: &str) -> bool {
        let expected = normalize(expected);
        std::iter::once(id)
            .chain(self.descendants(id))
            .any(|n| normalize(&self.text_content(n)) == expected)
    }

    /// Pre-order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    /// Descendants of `scope` matching `selector`, in document order
    pub fn query_all(&self, scope: NodeId, selector: &str) -> E2eResult<Vec<NodeId>> {
        let chain = parse_selector(selector)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .filter(|n| self.matches_chain(*n, &chain, scope))
            .collect())
    }

    fn matches_chain(&self, node: NodeId, chain: &[Compound], scope: NodeId) -> bool {
        let Some((last, rest)) = chain.split_last() else {
            return false;
        };
        if !self.matches(node, last) {
            return false;
        }

        let mut current = node;
        for compound in rest.iter().rev() {
            let found = self
                .ancestors(current)
                .take_while(|a| *a != scope)
                .find(|a| self.matches(*a, compound));
            match found {
                Some(a) => current = a,
                None => return false,
            }
        }
        true
    }

    fn matches(&self, id: NodeId, compound: &Compound) -> bool {
        let node = &self.nodes[id.0];
        if let Some(tag) = &compound.tag {
            if !node.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(want) = &compound.id {
            if node.attrs.get("id") != Some(want) {
                return false;
            }
        }
        compound.classes.iter().all(|c| self.has_class(id, c))
            && !compound.not_classes.iter().any(|c| self.has_class(id, c))
            && compound.attrs.iter().all(|(key, value)| match value {
                Some(value) => self.attr(id, key).as_deref() == Some(value.as_str()),
                None => self.attr(id, key).is_some(),
            })
    }
}

/// Dedupe node lists gathered from several scopes, keeping first occurrence
pub(crate) fn dedup(nodes: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    nodes.into_iter().filter(|n| seen.insert(*n)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    not_classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

fn parse_selector(selector: &str) -> E2eResult<Vec<Compound>> {
    let mut input = ParserInput::new(selector);
    let mut parser = Parser::new(&mut input);
    parse_chain(&mut parser).map_err(|_| E2eError::UnsupportedSelector(selector.to_string()))
}

fn parse_chain<'i>(parser: &mut Parser<'i, '_>) -> Result<Vec<Compound>, ParseError<'i, ()>> {
    let mut chain = Vec::new();
    let mut current = Compound::default();

    loop {
        let token = match parser.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::WhiteSpace(_) => {
                if current != Compound::default() {
                    chain.push(std::mem::take(&mut current));
                }
            }
            Token::Ident(tag) if current == Compound::default() => {
                current.tag = Some(tag.to_ascii_lowercase());
            }
            Token::IDHash(id) | Token::Hash(id) => current.id = Some(id.to_string()),
            Token::Delim('.') => current.classes.push(parser.expect_ident()?.to_string()),
            Token::SquareBracketBlock => {
                current.attrs.push(parser.parse_nested_block(parse_attr)?);
            }
            Token::Colon => {
                let pseudo = parser.next_including_whitespace()?.clone();
                match pseudo {
                    Token::Function(name) if name.eq_ignore_ascii_case("not") => {
                        let class = parser.parse_nested_block(parse_negated_class)?;
                        current.not_classes.push(class);
                    }
                    other => return Err(parser.new_unexpected_token_error(other)),
                }
            }
            other => return Err(parser.new_unexpected_token_error(other)),
        }
    }

    if current != Compound::default() {
        chain.push(current);
    }
    if chain.is_empty() {
        return Err(parser.new_custom_error(()));
    }
    Ok(chain)
}

/// `[name]` or `[name=value]`, value quoted or bare
fn parse_attr<'i>(
    parser: &mut Parser<'i, '_>,
) -> Result<(String, Option<String>), ParseError<'i, ()>> {
    let name = parser.expect_ident()?.to_string();
    if parser.is_exhausted() {
        return Ok((name, None));
    }
    parser.expect_delim('=')?;
    let value = parser.next()?.clone();
    match value {
        Token::Ident(value) | Token::QuotedString(value) => Ok((name, Some(value.to_string()))),
        other => Err(parser.new_unexpected_token_error(other)),
    }
}

/// Inside `:not(...)`, a single class
fn parse_negated_class<'i>(parser: &mut Parser<'i, '_>) -> Result<String, ParseError<'i, ()>> {
    parser.expect_delim('.')?;
    Ok(parser.expect_ident()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Dom, NodeId) {
        let mut dom = Dom::new();
        let root = dom.root();
        let body = dom.append(root, "tbody");
        dom.set_attr(body, "data-testid", "virtualised-table.body");
        let header = dom.append(body, "tr");
        dom.add_class(header, "header");
        dom.append_text(header, "th", "Name");
        let buffer = dom.append(body, "tr");
        dom.add_class(buffer, "buffer");
        for name in ["Table.cy.ts", "maps.cy.ts"] {
            let row = dom.append(body, "tr");
            dom.append_text(row, "td", name);
            dom.append_text(row, "td", "Passed");
        }
        (dom, body)
    }

    #[test]
    fn test_parse_compound_parts() {
        let chain = parse_selector("tr.selected:not(.buffer):not(.header)").unwrap();
        let c = &chain[0];
        assert_eq!(chain.len(), 1);
        assert_eq!(c.tag.as_deref(), Some("tr"));
        assert_eq!(c.classes, vec!["selected"]);
        assert_eq!(c.not_classes, vec!["buffer", "header"]);

        let chain = parse_selector("  [data-testid=\"virtualised-table.body\"]  td ").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(
            chain[0].attrs,
            vec![("data-testid".to_string(), Some("virtualised-table.body".to_string()))]
        );
        assert_eq!(chain[1].tag.as_deref(), Some("td"));
    }

    #[test]
    fn test_quoted_attribute_value_may_contain_brackets() {
        let chain = parse_selector("div[data-label=\"a]b c\"].cell").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(
            chain[0].attrs,
            vec![("data-label".to_string(), Some("a]b c".to_string()))]
        );
        assert_eq!(chain[0].classes, vec!["cell"]);

        let mut dom = Dom::new();
        let root = dom.root();
        let cell = dom.append(root, "div");
        dom.set_attr(cell, "data-label", "a]b c");
        dom.add_class(cell, "cell");
        assert_eq!(dom.query_all(root, "[data-label='a]b c']").unwrap(), vec![cell]);
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(parse_selector("").is_err());
        assert!(parse_selector("tr > td").is_err());
        assert!(parse_selector("tr:first-child").is_err());
        assert!(parse_selector("tr:not(td)").is_err());
        assert!(parse_selector(".selected tr").is_ok());
        assert!(parse_selector("td.x tr").is_ok());
        assert!(parse_selector(".x tr.y").is_ok());
        assert!(parse_selector(".x.y tr").is_ok());
        assert!(parse_selector(".x tr .y").is_ok());
    }

    #[test]
    fn test_descendant_query_excludes_structural_rows() {
        let (dom, _) = sample();
        let selector = "[data-testid=\"virtualised-table.body\"] tr:not(.buffer):not(.header)";
        let rows = dom.query_all(dom.root(), selector).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(dom.text_content(rows[0]), "Table.cy.tsPassed");
    }

    #[test]
    fn test_exact_text_checks_cells() {
        let (dom, body) = sample();
        let rows = dom.query_all(body, "tr").unwrap();
        let data = rows[2];
        assert!(dom.has_exact_text(data, "Table.cy.ts"));
        assert!(!dom.has_exact_text(data, "Table.cy"));
    }

    #[test]
    fn test_cleared_children_are_detached() {
        let (mut dom, body) = sample();
        let rows = dom.query_all(body, "tr").unwrap();
        dom.clear_children(body);
        assert!(!dom.is_attached(rows[0]));
        assert!(dom.query_all(dom.root(), "tr").unwrap().is_empty());
    }

    #[test]
    fn test_cleared_slots_are_reused() {
        let (mut dom, body) = sample();
        let before = dom.capacity();
        for _ in 0..10 {
            dom.clear_children(body);
            let row = dom.append(body, "tr");
            dom.append_text(row, "td", "again");
        }
        assert_eq!(dom.capacity(), before);
        assert_eq!(dom.query_all(body, "tr td").unwrap().len(), 1);
    }

    #[test]
    fn test_hidden_ancestor_hides_descendants() {
        let mut dom = Dom::new();
        let root = dom.root();
        let menu = dom.append(root, "dma-cc-context-menu");
        let option = dom.append_text(menu, "div", "Filter");
        dom.set_hidden(menu, true);
        assert!(!dom.is_visible(option));
        dom.set_hidden(menu, false);
        assert!(dom.is_visible(option));
    }
}
