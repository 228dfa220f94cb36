//! Owned page tree the whole pipeline reads and mutates.
//!
//! HTML is ingested once (through scraper) into an arena of element/text
//! nodes; segmentation walks it, the highlighter splices spans into it, and
//! the annotator serializes it back out. Tests build trees directly without
//! any HTML involved.

use ego_tree::{NodeId, Tree};

#[derive(Debug, Clone, PartialEq)]
pub enum PageNode {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    /// Lowercased tag name.
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.attrs.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
    }

    /// Lowercased class+id blob for keyword checks.
    pub fn class_or_id_lc(&self) -> String {
        let mut s = String::new();
        if let Some(c) = self.attr("class") {
            s.push_str(c);
            s.push(' ');
        }
        if let Some(i) = self.attr("id") {
            s.push_str(i);
        }
        s.to_lowercase()
    }

    fn from_parsed(el: &html_scraper::node::Element) -> Self {
        Self {
            tag: el.name().to_ascii_lowercase(),
            attrs: el
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Non-whitespace char count.
pub fn char_count(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone)]
pub struct PageTree {
    tree: Tree<PageNode>,
    body: NodeId,
}

impl PageTree {
    /// Parse an HTML document. The parser is lenient and always yields a
    /// tree; missing html/head/body are synthesized.
    pub fn parse(html: &str) -> Self {
        let doc = html_scraper::Html::parse_document(html);
        let root_el = doc.root_element();
        let mut tree = Tree::new(PageNode::Element(ElementData::from_parsed(root_el.value())));
        {
            let mut dst = tree.root_mut();
            convert_children(root_el, &mut dst);
        }
        let body = find_tag(&tree, "body").unwrap_or_else(|| tree.root().id());
        Self { tree, body }
    }

    /// Empty document (html > body) for building fixtures by hand.
    pub fn empty() -> Self {
        let mut tree = Tree::new(PageNode::Element(ElementData::new("html")));
        let body = tree.root_mut().append(PageNode::Element(ElementData::new("body"))).id();
        Self { tree, body }
    }

    pub fn root(&self) -> NodeId {
        self.tree.root().id()
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    // ---- queries ----

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(
            self.tree.get(id).map(|n| n.value()),
            Some(PageNode::Element(_))
        )
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.tree.get(id)?.value() {
            PageNode::Element(el) => Some(el.tag.as_str()),
            PageNode::Text(_) => None,
        }
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.tree.get(id)?.value() {
            PageNode::Element(el) => Some(el),
            PageNode::Text(_) => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.tree.get(id)?.value() {
            PageNode::Text(t) => Some(t.as_str()),
            PageNode::Element(_) => None,
        }
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.tree.get(id)?.parent().map(|p| p.id())
    }

    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        match self.tree.get(id) {
            Some(n) => n.children().map(|c| c.id()).collect(),
            None => Vec::new(),
        }
    }

    /// Document-order descendants, self included.
    pub fn descendants_of(&self, id: NodeId) -> Vec<NodeId> {
        match self.tree.get(id) {
            Some(n) => n.descendants().map(|d| d.id()).collect(),
            None => Vec::new(),
        }
    }

    /// Nearest-first strict ancestors.
    pub fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        match self.tree.get(id) {
            Some(n) => n.ancestors().map(|a| a.id()).collect(),
            None => Vec::new(),
        }
    }

    /// True when `ancestor` is `id` or a strict ancestor of it.
    pub fn contains(&self, ancestor: NodeId, id: NodeId) -> bool {
        if ancestor == id {
            return true;
        }
        self.ancestors_of(id).contains(&ancestor)
    }

    /// Self-or-ancestor matching a predicate on element data, nearest first.
    pub fn closest<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&ElementData) -> bool,
    {
        std::iter::once(id)
            .chain(self.ancestors_of(id))
            .find(|&n| self.element(n).map(|el| pred(el)).unwrap_or(false))
    }

    pub fn count_tag(&self, id: NodeId, tag: &str) -> usize {
        self.descendants_of(id)
            .iter()
            .filter(|&&d| self.tag(d) == Some(tag))
            .count()
    }

    // ---- text assembly ----

    /// Raw concatenation of every text leaf under `id` (ruby included).
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(n) = self.tree.get(id) {
            for d in n.descendants() {
                if let PageNode::Text(t) = d.value() {
                    out.push_str(t);
                }
            }
        }
        out
    }

    /// Flattened, whitespace-collapsed text with ruby annotation (`rt`/`rp`)
    /// excluded. This is the text units and chunks are built from.
    pub fn reading_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.push_reading_text(id, &mut out);
        norm_ws(&out)
    }

    fn push_reading_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        match node.value() {
            PageNode::Text(t) => out.push_str(t),
            PageNode::Element(el) => {
                if el.tag == "rt" || el.tag == "rp" {
                    return;
                }
                for c in node.children() {
                    self.push_reading_text(c.id(), out);
                }
            }
        }
    }

    /// Non-whitespace char count of the raw text (ruby included); used for
    /// container scoring and coverage, where ruby text is part of the mass.
    pub fn raw_char_count(&self, id: NodeId) -> usize {
        char_count(&self.text_content(id))
    }

    // ---- construction / mutation ----

    pub fn new_element(&mut self, data: ElementData) -> NodeId {
        self.tree.orphan(PageNode::Element(data)).id()
    }

    pub fn new_text(&mut self, text: &str) -> NodeId {
        self.tree.orphan(PageNode::Text(text.to_string())).id()
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(mut p) = self.tree.get_mut(parent) {
            p.append_id(child);
        }
    }

    pub fn insert_before(&mut self, anchor: NodeId, id: NodeId) {
        if let Some(mut a) = self.tree.get_mut(anchor) {
            a.insert_id_before(id);
        }
    }

    pub fn insert_after(&mut self, anchor: NodeId, id: NodeId) {
        if let Some(mut a) = self.tree.get_mut(anchor) {
            a.insert_id_after(id);
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(mut n) = self.tree.get_mut(id) {
            n.detach();
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(mut n) = self.tree.get_mut(id) {
            if let PageNode::Text(t) = n.value() {
                *t = text.to_string();
            }
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(mut n) = self.tree.get_mut(id) {
            if let PageNode::Element(el) = n.value() {
                el.set_attr(name, value);
            }
        }
    }

    /// Replace a node with its children, keeping order.
    pub fn unwrap_node(&mut self, id: NodeId) {
        for child in self.children_of(id) {
            self.insert_before(id, child);
        }
        self.detach(id);
    }

    /// Merge adjacent text-leaf children of `parent` so unwrapping restores
    /// the original text-node structure.
    pub fn normalize_children(&mut self, parent: NodeId) {
        let children = self.children_of(parent);
        let mut run_head: Option<NodeId> = None;
        for id in children {
            let is_text = self.text(id).is_some();
            match (is_text, run_head) {
                (true, None) => run_head = Some(id),
                (true, Some(head)) => {
                    let mut merged = self.text(head).unwrap_or_default().to_string();
                    merged.push_str(self.text(id).unwrap_or_default());
                    self.set_text(head, &merged);
                    self.detach(id);
                }
                (false, _) => run_head = None,
            }
        }
    }

    /// Replace a text leaf with a prepared ordered run of nodes.
    pub fn replace_leaf(&mut self, leaf: NodeId, pieces: &[NodeId]) {
        for &piece in pieces {
            self.insert_before(leaf, piece);
        }
        self.detach(leaf);
    }

    // ---- serialization ----

    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        match node.value() {
            PageNode::Text(t) => out.push_str(&esc_text(t)),
            PageNode::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (k, v) in &el.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&esc_attr(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&el.tag.as_str()) {
                    return;
                }
                for c in node.children() {
                    self.write_html(c.id(), out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

fn esc_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn esc_attr(s: &str) -> String {
    esc_text(s).replace('"', "&quot;")
}

fn find_tag(tree: &Tree<PageNode>, tag: &str) -> Option<NodeId> {
    tree.root().descendants().find_map(|n| match n.value() {
        PageNode::Element(el) if el.tag == tag => Some(n.id()),
        _ => None,
    })
}

fn convert_children(src: html_scraper::ElementRef<'_>, dst: &mut ego_tree::NodeMut<'_, PageNode>) {
    for child in src.children() {
        match child.value() {
            html_scraper::Node::Text(t) => {
                dst.append(PageNode::Text(t.text.to_string()));
            }
            html_scraper::Node::Element(_) => {
                if let Some(el) = html_scraper::ElementRef::wrap(child) {
                    let mut node =
                        dst.append(PageNode::Element(ElementData::from_parsed(el.value())));
                    convert_children(el, &mut node);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_builds_body_and_text() {
        let page = PageTree::parse("<html><body><p>こんにちは</p></body></html>");
        let body = page.body();
        assert_eq!(page.tag(body), Some("body"));
        assert_eq!(page.reading_text(body), "こんにちは");
    }

    #[test]
    fn parse_synthesizes_missing_body() {
        let page = PageTree::parse("<p>短い文。</p>");
        assert_eq!(page.tag(page.body()), Some("body"));
        assert_eq!(page.reading_text(page.body()), "短い文。");
    }

    #[test]
    fn reading_text_excludes_ruby_annotations() {
        let page =
            PageTree::parse("<p><ruby>漢字<rt>かんじ</rt><rp>(</rp></ruby>を読む</p>");
        assert_eq!(page.reading_text(page.body()), "漢字を読む");
        // Raw mass still counts the annotation.
        assert_eq!(page.raw_char_count(page.body()), 9);
    }

    #[test]
    fn reading_text_collapses_whitespace() {
        let page = PageTree::parse("<div>  a \n\t b  <span> c </span></div>");
        assert_eq!(page.reading_text(page.body()), "a b c");
    }

    #[test]
    fn unwrap_and_normalize_restore_single_text_leaf() {
        let mut page = PageTree::empty();
        let body = page.body();
        let p = page.new_element(ElementData::new("p"));
        page.append_child(body, p);
        let t1 = page.new_text("前");
        let span = page.new_element(ElementData::new("span"));
        let t2 = page.new_text("中");
        let t3 = page.new_text("後");
        page.append_child(p, t1);
        page.append_child(p, span);
        page.append_child(span, t2);
        page.append_child(p, t3);

        page.unwrap_node(span);
        page.normalize_children(p);

        let kids = page.children_of(p);
        assert_eq!(kids.len(), 1);
        assert_eq!(page.text(kids[0]), Some("前中後"));
    }

    #[test]
    fn to_html_escapes_and_closes() {
        let mut page = PageTree::empty();
        let body = page.body();
        let div = page.new_element(ElementData::new("div").with_attr("class", "a\"b"));
        let txt = page.new_text("1 < 2 & so");
        page.append_child(body, div);
        page.append_child(div, txt);
        assert_eq!(
            page.to_html(div),
            "<div class=\"a&quot;b\">1 &lt; 2 &amp; so</div>"
        );
    }

    #[test]
    fn to_html_leaves_void_tags_open() {
        let page = PageTree::parse("<div>上<br>下</div>");
        let body = page.body();
        let div = page.children_of(body)[0];
        assert_eq!(page.to_html(div), "<div>上<br>下</div>");
    }

    #[test]
    fn closest_walks_self_then_ancestors() {
        let page = PageTree::parse("<section class=\"chapter\"><p>本文</p></section>");
        let body = page.body();
        let section = page.children_of(body)[0];
        let p = page.children_of(section)[0];
        let hit = page.closest(p, |el| el.class_or_id_lc().contains("chapter"));
        assert_eq!(hit, Some(section));
    }
}
