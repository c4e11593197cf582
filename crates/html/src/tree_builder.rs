//! Token stream to [`Document`] construction with HTML-style error recovery.
//!
//! Recovery rules implemented:
//! - `html`, `head` and `body` are implied when missing; head-only elements
//!   before body content land in `head`.
//! - Block starts close an open `p`; `li`, `dt`/`dd`, `option`, headings and
//!   table rows/cells close their open siblings.
//! - Void elements never take children; `/>` is honored only inside `svg` and
//!   `math`.
//! - End tags without a matching open element are ignored (a stray `</p>`
//!   becomes an empty paragraph), and an end tag never closes across a block
//!   boundary it did not open.
//! - Whatever is open at end of input is closed.

use crate::dom::{Attribute, Document, NodeKey};
use crate::tokenizer::{Token, Tokenizer};
use crate::{ParseFailure, ParseLimits};

pub(crate) fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_head_element(name: &str) -> bool {
    matches!(
        name,
        "base"
            | "basefont"
            | "bgsound"
            | "link"
            | "meta"
            | "noscript"
            | "script"
            | "style"
            | "template"
            | "title"
    )
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn closes_paragraph(name: &str) -> bool {
    is_heading(name)
        || matches!(
            name,
            "address"
                | "article"
                | "aside"
                | "blockquote"
                | "center"
                | "details"
                | "dialog"
                | "dir"
                | "div"
                | "dl"
                | "dd"
                | "dt"
                | "fieldset"
                | "figcaption"
                | "figure"
                | "footer"
                | "form"
                | "header"
                | "hgroup"
                | "hr"
                | "li"
                | "listing"
                | "main"
                | "menu"
                | "nav"
                | "ol"
                | "p"
                | "pre"
                | "section"
                | "summary"
                | "table"
                | "ul"
                | "xmp"
        )
}

// Elements an unmatched end tag may not close across.
fn is_special(name: &str) -> bool {
    closes_paragraph(name)
        || is_void_element(name)
        || matches!(
            name,
            "applet"
                | "body"
                | "button"
                | "caption"
                | "colgroup"
                | "frameset"
                | "head"
                | "html"
                | "iframe"
                | "marquee"
                | "noembed"
                | "noframes"
                | "noscript"
                | "object"
                | "plaintext"
                | "script"
                | "select"
                | "style"
                | "tbody"
                | "td"
                | "template"
                | "textarea"
                | "tfoot"
                | "th"
                | "thead"
                | "title"
                | "tr"
        )
}

fn is_cell(name: &str) -> bool {
    name == "td" || name == "th"
}

fn is_table_part(name: &str) -> bool {
    matches!(name, "caption" | "tbody" | "td" | "tfoot" | "th" | "thead" | "tr")
}

fn is_scope_barrier(name: &str) -> bool {
    matches!(
        name,
        "applet" | "caption" | "html" | "table" | "td" | "th" | "marquee" | "object" | "template"
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    BeforeBody,
    InBody,
}

pub(crate) struct TreeBuilder<'l> {
    doc: Document,
    open: Vec<NodeKey>,
    mode: Mode,
    fragment: bool,
    html: Option<NodeKey>,
    head: Option<NodeKey>,
    body: Option<NodeKey>,
    limits: &'l ParseLimits,
    created: usize,
}

impl<'l> TreeBuilder<'l> {
    pub(crate) fn for_document(limits: &'l ParseLimits) -> Self {
        Self {
            doc: Document::new(),
            open: Vec::new(),
            mode: Mode::BeforeBody,
            fragment: false,
            html: None,
            head: None,
            body: None,
            limits,
            created: 0,
        }
    }

    /// Builder whose top-level nodes become children of the document node, as
    /// if parsed inside a `<body>`.
    pub(crate) fn for_fragment(limits: &'l ParseLimits) -> Self {
        let mut builder = Self::for_document(limits);
        builder.fragment = true;
        builder.mode = Mode::InBody;
        builder.open.push(NodeKey::DOCUMENT);
        builder
    }

    pub(crate) fn run(mut self, input: &str) -> Result<Document, ParseFailure> {
        for token in Tokenizer::new(input) {
            self.process(token)?;
        }
        if !self.fragment {
            self.ensure_body()?;
        }
        log::trace!(
            target: "drift.parse",
            "built tree: {} nodes (fragment={})",
            self.created,
            self.fragment
        );
        Ok(self.doc)
    }

    fn budget(&mut self) -> Result<(), ParseFailure> {
        self.created += 1;
        if self.created > self.limits.max_nodes {
            return Err(ParseFailure::TooManyNodes {
                limit: self.limits.max_nodes,
            });
        }
        Ok(())
    }

    fn current(&self) -> NodeKey {
        self.open.last().copied().unwrap_or(NodeKey::DOCUMENT)
    }

    fn current_name(&self) -> Option<&str> {
        self.doc.element_name(self.current())
    }

    // Lowest stack index a recovery pop may reach.
    fn floor(&self) -> usize {
        if self.fragment {
            return 0;
        }
        self.body
            .and_then(|body| self.open.iter().position(|k| *k == body))
            .unwrap_or(0)
    }

    fn attach(&mut self, parent: NodeKey, child: NodeKey) {
        let result = self.doc.append_child(parent, child);
        debug_assert!(result.is_ok(), "tree builder attach failed: {result:?}");
    }

    fn insert_element(
        &mut self,
        parent: NodeKey,
        name: &str,
        attributes: Vec<Attribute>,
    ) -> Result<NodeKey, ParseFailure> {
        self.budget()?;
        let key = self.doc.create_element(name, attributes);
        self.attach(parent, key);
        Ok(key)
    }

    fn insert_text(&mut self, parent: NodeKey, text: &str) -> Result<(), ParseFailure> {
        match self.doc.append_text(parent, text) {
            Ok(Some(_)) => self.budget(),
            Ok(None) => Ok(()),
            Err(err) => {
                debug_assert!(false, "text insertion failed: {err}");
                Ok(())
            }
        }
    }

    fn insert_comment(&mut self, parent: NodeKey, text: String) -> Result<(), ParseFailure> {
        self.budget()?;
        let key = self.doc.create_comment(text);
        self.attach(parent, key);
        Ok(())
    }

    fn merge_attributes(&mut self, target: Option<NodeKey>, attributes: Vec<Attribute>) {
        let Some(target) = target else {
            return;
        };
        for attr in attributes {
            if self.doc.attr(target, &attr.name).is_none() {
                self.doc.set_attr(target, &attr.name, attr.value);
            }
        }
    }

    fn ensure_html(&mut self) -> Result<NodeKey, ParseFailure> {
        if let Some(html) = self.html {
            return Ok(html);
        }
        let html = self.insert_element(NodeKey::DOCUMENT, "html", Vec::new())?;
        self.open.push(html);
        self.html = Some(html);
        Ok(html)
    }

    fn ensure_head(&mut self) -> Result<NodeKey, ParseFailure> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let html = self.ensure_html()?;
        let head = self.insert_element(html, "head", Vec::new())?;
        self.open.push(head);
        self.head = Some(head);
        Ok(head)
    }

    fn close_head(&mut self) {
        if let Some(head) = self.head
            && let Some(pos) = self.open.iter().position(|k| *k == head)
        {
            self.open.truncate(pos);
        }
    }

    fn ensure_body(&mut self) -> Result<NodeKey, ParseFailure> {
        if let Some(body) = self.body {
            return Ok(body);
        }
        self.start_body(Vec::new())
    }

    fn start_body(&mut self, attributes: Vec<Attribute>) -> Result<NodeKey, ParseFailure> {
        self.ensure_head()?;
        self.close_head();
        let html = self.ensure_html()?;
        let body = self.insert_element(html, "body", attributes)?;
        self.open.push(body);
        self.body = Some(body);
        self.mode = Mode::InBody;
        Ok(body)
    }

    fn process(&mut self, token: Token) -> Result<(), ParseFailure> {
        match self.mode {
            Mode::BeforeBody => self.process_before_body(token),
            Mode::InBody => self.process_in_body(token),
        }
    }

    fn process_before_body(&mut self, token: Token) -> Result<(), ParseFailure> {
        match token {
            Token::Doctype(name) => {
                if self.html.is_none() && self.doc.doctype().is_none() {
                    self.doc.set_doctype(Some(name.unwrap_or_default()));
                }
                Ok(())
            }
            Token::Comment(text) => {
                let parent = self.current();
                self.insert_comment(parent, text)
            }
            Token::Text(text) => {
                // Text inside title/style/script/noscript in the head.
                if self.current_name().is_some_and(is_head_element) {
                    let current = self.current();
                    return self.insert_text(current, &text);
                }
                let rest = text.trim_start_matches(|c: char| c.is_ascii_whitespace());
                let ws = &text[..text.len() - rest.len()];
                // Whitespace before `<head>` is dropped, as in browsers.
                if self.head.is_some() && !ws.is_empty() {
                    let current = self.current();
                    self.insert_text(current, ws)?;
                }
                if rest.is_empty() {
                    return Ok(());
                }
                self.ensure_body()?;
                self.process_in_body(Token::Text(rest.to_owned()))
            }
            Token::StartTag {
                name, attributes, ..
            } => match name.as_str() {
                "html" => {
                    self.ensure_html()?;
                    self.merge_attributes(self.html, attributes);
                    Ok(())
                }
                "head" => {
                    if self.head.is_none() {
                        let html = self.ensure_html()?;
                        let head = self.insert_element(html, "head", attributes)?;
                        self.open.push(head);
                        self.head = Some(head);
                    }
                    Ok(())
                }
                "body" => {
                    self.start_body(attributes)?;
                    Ok(())
                }
                n if is_head_element(n) => {
                    let head = self.ensure_head()?;
                    let parent = if self.open.contains(&head) { self.current() } else { head };
                    let el = self.insert_element(parent, n, attributes)?;
                    if !is_void_element(n) {
                        self.open.push(el);
                    }
                    Ok(())
                }
                _ => {
                    self.ensure_body()?;
                    self.process_in_body(Token::StartTag {
                        name,
                        attributes,
                        self_closing: false,
                    })
                }
            },
            Token::EndTag(name) => match name.as_str() {
                "head" => {
                    if self.head.is_some_and(|h| self.current() == h) {
                        self.open.pop();
                    }
                    Ok(())
                }
                "body" | "html" | "br" => {
                    self.ensure_body()?;
                    if name == "br" {
                        return self.process_in_body(Token::EndTag(name));
                    }
                    Ok(())
                }
                n if is_head_element(n) => {
                    if self.current_name() == Some(n) {
                        self.open.pop();
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
        }
    }

    fn process_in_body(&mut self, token: Token) -> Result<(), ParseFailure> {
        match token {
            Token::Doctype(_) => Ok(()),
            Token::Comment(text) => {
                let parent = self.current();
                self.insert_comment(parent, text)
            }
            Token::Text(text) => {
                let parent = self.current();
                self.insert_text(parent, &text)
            }
            Token::StartTag {
                name,
                attributes,
                self_closing,
            } => match name.as_str() {
                "html" | "body" | "head" if self.fragment => Ok(()),
                "html" => {
                    self.merge_attributes(self.html, attributes);
                    Ok(())
                }
                "body" => {
                    self.merge_attributes(self.body, attributes);
                    Ok(())
                }
                "head" => Ok(()),
                _ => self.insert_in_body(&name, attributes, self_closing),
            },
            Token::EndTag(name) => match name.as_str() {
                "body" | "html" => Ok(()),
                "p" => {
                    if self.in_scope(|n| n == "p", true) {
                        self.pop_through(|n| n == "p");
                    } else {
                        let parent = self.current();
                        self.insert_element(parent, "p", Vec::new())?;
                    }
                    Ok(())
                }
                "br" => {
                    let parent = self.current();
                    self.insert_element(parent, "br", Vec::new())?;
                    Ok(())
                }
                n if is_heading(n) => {
                    if self.in_scope(is_heading, false) {
                        self.pop_through(is_heading);
                    }
                    Ok(())
                }
                n if closes_paragraph(n) || is_table_part(n) || n == "button" => {
                    if self.in_scope(|open| open == n, false) {
                        self.pop_through(|open| open == n);
                    }
                    Ok(())
                }
                n => {
                    self.close_by_end_tag(n);
                    Ok(())
                }
            },
        }
    }

    fn in_foreign_content(&self) -> bool {
        self.open[self.floor()..]
            .iter()
            .any(|k| matches!(self.doc.element_name(*k), Some("svg" | "math")))
    }

    fn insert_in_body(
        &mut self,
        name: &str,
        attributes: Vec<Attribute>,
        self_closing: bool,
    ) -> Result<(), ParseFailure> {
        let foreign = self.in_foreign_content();
        if !foreign {
            if closes_paragraph(name) && self.in_scope(|n| n == "p", true) {
                self.pop_through(|n| n == "p");
            }
            match name {
                "li" => self.close_list_item(|n| n == "li"),
                "dt" | "dd" => self.close_list_item(|n| n == "dt" || n == "dd"),
                n if is_heading(n) => {
                    if self.current_name().is_some_and(is_heading) {
                        self.open.pop();
                    }
                }
                "option" => {
                    if self.current_name() == Some("option") {
                        self.open.pop();
                    }
                }
                "optgroup" => {
                    if self.current_name() == Some("option") {
                        self.open.pop();
                    }
                    if self.current_name() == Some("optgroup") {
                        self.open.pop();
                    }
                }
                "a" | "button" => {
                    if self.in_scope(|n| n == name, false) {
                        self.pop_through(|n| n == name);
                    }
                }
                "td" | "th" => self.close_in_table(is_cell),
                "tr" => {
                    self.close_in_table(is_cell);
                    self.close_in_table(|n| n == "tr");
                }
                "thead" | "tbody" | "tfoot" => {
                    self.close_in_table(is_cell);
                    self.close_in_table(|n| n == "tr");
                    self.close_in_table(|n| matches!(n, "thead" | "tbody" | "tfoot"));
                }
                _ => {}
            }
        }

        let parent = self.current();
        let el = self.insert_element(parent, name, attributes)?;
        let leaf = is_void_element(name) || (foreign && self_closing);
        if !leaf {
            self.open.push(el);
        }
        Ok(())
    }

    fn in_scope(&self, target: impl Fn(&str) -> bool, button_scope: bool) -> bool {
        for key in self.open[self.floor()..].iter().rev() {
            let Some(name) = self.doc.element_name(*key) else {
                return false;
            };
            if target(name) {
                return true;
            }
            if is_scope_barrier(name) || (button_scope && name == "button") {
                return false;
            }
        }
        false
    }

    // Pops up to and including the topmost element matching `target`, never
    // below the floor.
    fn pop_through(&mut self, target: impl Fn(&str) -> bool) {
        let floor = self.floor();
        let found = (floor + 1..self.open.len())
            .rev()
            .find(|i| self.doc.element_name(self.open[*i]).is_some_and(&target));
        if let Some(i) = found {
            self.open.truncate(i);
        }
    }

    fn close_list_item(&mut self, target: impl Fn(&str) -> bool) {
        let floor = self.floor();
        for i in (floor + 1..self.open.len()).rev() {
            let Some(name) = self.doc.element_name(self.open[i]) else {
                return;
            };
            if target(name) {
                self.open.truncate(i);
                return;
            }
            if is_special(name) && !matches!(name, "address" | "div" | "p") {
                return;
            }
        }
    }

    fn close_in_table(&mut self, target: impl Fn(&str) -> bool) {
        let floor = self.floor();
        for i in (floor + 1..self.open.len()).rev() {
            let Some(name) = self.doc.element_name(self.open[i]) else {
                return;
            };
            if name == "table" {
                return;
            }
            if target(name) {
                self.open.truncate(i);
                return;
            }
        }
    }

    fn close_by_end_tag(&mut self, name: &str) {
        let floor = self.floor();
        for i in (floor + 1..self.open.len()).rev() {
            let Some(open_name) = self.doc.element_name(self.open[i]) else {
                return;
            };
            if open_name == name {
                self.open.truncate(i);
                return;
            }
            if is_special(open_name) {
                log::trace!(target: "drift.parse", "ignored stray </{name}>");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ParseLimits, parse_document, parse_fragment, serialize_document, serialize_node};

    fn doc(markup: &str) -> String {
        serialize_document(&parse_document(markup, &ParseLimits::default()).unwrap())
    }

    fn body(markup: &str) -> String {
        let d = parse_document(markup, &ParseLimits::default()).unwrap();
        let body = d.body().unwrap();
        crate::serialize_children(&d, body)
    }

    #[test]
    fn implies_html_head_body() {
        assert_eq!(doc("<p>Hi</p>"), "<html><head></head><body><p>Hi</p></body></html>");
        assert_eq!(doc(""), "<html><head></head><body></body></html>");
    }

    #[test]
    fn head_elements_go_to_head() {
        assert_eq!(
            doc("<!doctype html><title>T</title><style>p{}</style><p>x"),
            concat!(
                "<!DOCTYPE html><html><head><title>T</title><style>p{}</style></head>",
                "<body><p>x</p></body></html>",
            )
        );
    }

    #[test]
    fn explicit_structure_round_trips() {
        let src = concat!(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"></head>",
            "<body class=\"b\"><div>x</div></body></html>",
        );
        assert_eq!(doc(src), src);
    }

    #[test]
    fn block_start_closes_paragraph() {
        assert_eq!(body("<p>one<div>two</div>"), "<p>one</p><div>two</div>");
        assert_eq!(body("<p>a<p>b"), "<p>a</p><p>b</p>");
    }

    #[test]
    fn inline_start_stays_in_paragraph() {
        assert_eq!(body("<p>a<span>b</span>c"), "<p>a<span>b</span>c</p>");
    }

    #[test]
    fn list_items_close_siblings() {
        assert_eq!(
            body("<ul><li>a<li>b<li>c</ul>"),
            "<ul><li>a</li><li>b</li><li>c</li></ul>"
        );
        assert_eq!(body("<dl><dt>k<dd>v<dt>k2</dl>"), "<dl><dt>k</dt><dd>v</dd><dt>k2</dt></dl>");
    }

    #[test]
    fn nested_list_item_does_not_close_outer() {
        assert_eq!(
            body("<ul><li>a<ul><li>b</ul><li>c</ul>"),
            "<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul>"
        );
    }

    #[test]
    fn void_elements_take_no_children() {
        assert_eq!(body("<p>a<br>b<img src=x>c</p>"), "<p>a<br>b<img src=\"x\">c</p>");
    }

    #[test]
    fn self_closing_non_void_is_open_outside_foreign_content() {
        assert_eq!(body("<div/>x"), "<div>x</div>");
        assert_eq!(
            body("<svg><path d=\"M0\"/><circle/></svg>y"),
            "<svg><path d=\"M0\"></path><circle></circle></svg>y"
        );
    }

    #[test]
    fn stray_end_tags() {
        assert_eq!(body("a</span>b"), "ab");
        assert_eq!(body("</p>x"), "<p></p>x");
        assert_eq!(body("<div><span>x</div>y"), "<div><span>x</span></div>y");
        assert_eq!(body("<span><div>x</span>y</div>"), "<span><div>xy</div></span>");
    }

    #[test]
    fn end_tag_closes_implied_inline_children() {
        assert_eq!(body("<section><b>x</section>z"), "<section><b>x</b></section>z");
    }

    #[test]
    fn headings_close_each_other() {
        assert_eq!(body("<h1>a<h2>b</h1>c"), "<h1>a</h1><h2>b</h2>c");
    }

    #[test]
    fn table_rows_and_cells() {
        assert_eq!(
            body("<table><tr><td>a<td>b<tr><td>c</table>"),
            "<table><tr><td>a</td><td>b</td></tr><tr><td>c</td></tr></table>"
        );
    }

    #[test]
    fn unclosed_elements_close_at_eof() {
        assert_eq!(body("<div><section><p>deep"), "<div><section><p>deep</p></section></div>");
    }

    #[test]
    fn content_after_body_end_stays_in_body() {
        assert_eq!(
            doc("<body><p>a</p></body></html><p>b</p>"),
            "<html><head></head><body><p>a</p><p>b</p></body></html>"
        );
    }

    #[test]
    fn fragment_ignores_document_level_tags() {
        let frag =
            parse_fragment("<html><body><p>x</p></body></html><b>y</b>", &ParseLimits::default())
                .unwrap();
        let roots: Vec<String> = frag
            .children(frag.root())
            .iter()
            .map(|k| serialize_node(&frag, *k))
            .collect();
        assert_eq!(roots, vec!["<p>x</p>", "<b>y</b>"]);
    }

    #[test]
    fn fragment_keeps_head_elements_in_place() {
        let frag =
            parse_fragment("<style>a{}</style><div>z</div>", &ParseLimits::default()).unwrap();
        assert_eq!(frag.children(frag.root()).len(), 2);
        assert_eq!(serialize_document(&frag), "<style>a{}</style><div>z</div>");
    }

    #[test]
    fn node_budget_is_enforced() {
        let limits = ParseLimits {
            max_nodes: 5,
            ..ParseLimits::default()
        };
        let err =
            parse_document("<div><div><div><div></div></div></div></div>", &limits).unwrap_err();
        assert_eq!(err, crate::ParseFailure::TooManyNodes { limit: 5 });
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let depth = 5_000;
        let markup = "<div>".repeat(depth) + &"</div>".repeat(depth);
        let d = parse_document(&markup, &ParseLimits::default()).unwrap();
        assert_eq!(d.descendants(d.root()).count(), depth + 4);
    }
}
