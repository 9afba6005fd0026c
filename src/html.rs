use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};

use crate::style::{Declaration, parse_inline_style};

/// One element in a parsed report template. The tree is owned and
/// detached from the parser so captures can outlive the source markup.
#[derive(Debug, Clone)]
pub struct RenderNode {
    pub tag: String,
    pub classes: Vec<String>,
    pub inline: Vec<Declaration>,
    /// `src` of an `img` element, if any.
    pub src: Option<String>,
    /// Concatenated direct text content, trimmed.
    pub text: Option<String>,
    pub children: Vec<RenderNode>,
}

/// Stylesheet attached to a template. External sheets cannot be read
/// at capture time and carry only their href.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StylesheetSource {
    Inline(String),
    External(String),
}

#[derive(Debug, Clone)]
pub struct RenderTree {
    pub root: RenderNode,
    pub stylesheets: Vec<StylesheetSource>,
}

impl RenderNode {
    fn empty(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            classes: Vec::new(),
            inline: Vec::new(),
            src: None,
            text: None,
            children: Vec::new(),
        }
    }

    /// Depth-first text of this subtree, element texts joined with
    /// single spaces. Test and debug helper.
    pub fn collected_text(&self) -> String {
        let mut out = String::new();
        self.collect_text_into(&mut out);
        out
    }

    fn collect_text_into(&self, out: &mut String) {
        if let Some(text) = &self.text {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_text_into(out);
        }
    }
}

/// Parses template markup into a render tree. The root is the first
/// element under `body`; style blocks and stylesheet links anywhere in
/// the document are collected in source order.
pub fn parse_template(html: &str) -> RenderTree {
    let document = kuchiki::parse_html().one(html);

    let mut stylesheets = Vec::new();
    if let Ok(links) = document.select("link[rel][href]") {
        for link in links {
            let attrs = link.attributes.borrow();
            let rel = attrs.get("rel").unwrap_or("").to_ascii_lowercase();
            if rel.contains("stylesheet") {
                let href = attrs.get("href").unwrap_or("").to_string();
                stylesheets.push(StylesheetSource::External(href));
            }
        }
    }
    if let Ok(styles) = document.select("style") {
        for style in styles {
            stylesheets.push(StylesheetSource::Inline(style.as_node().text_contents()));
        }
    }

    let root = document
        .select_first("body")
        .ok()
        .and_then(|body| {
            body.as_node()
                .children()
                .find(|child| child.as_element().is_some())
        })
        .map(|node| convert_element(&node))
        .unwrap_or_else(|| RenderNode::empty("div"));

    RenderTree { root, stylesheets }
}

fn convert_element(node: &NodeRef) -> RenderNode {
    let NodeData::Element(element) = node.data() else {
        return RenderNode::empty("div");
    };
    let tag = element.name.local.as_ref().to_ascii_lowercase();
    let mut converted = RenderNode::empty(&tag);
    {
        let attrs = element.attributes.borrow();
        if let Some(class_attr) = attrs.get("class") {
            converted.classes = class_attr
                .split_whitespace()
                .map(|class| class.to_string())
                .collect();
        }
        if let Some(style_attr) = attrs.get("style") {
            converted.inline = parse_inline_style(style_attr);
        }
        if tag == "img" {
            converted.src = attrs.get("src").map(|src| src.to_string());
        }
    }

    let mut text = String::new();
    for child in node.children() {
        match child.data() {
            NodeData::Element(_) => converted.children.push(convert_element(&child)),
            NodeData::Text(content) => {
                let content = content.borrow();
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(trimmed);
                }
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        converted.text = Some(text);
    }
    converted
}

/// Escapes text interpolated into template markup.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
