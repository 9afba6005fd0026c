use std::collections::HashMap;

use lightningcss::properties::Property;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;
use lightningcss::values::color::CssColor;

use crate::debug::DebugLogger;
use crate::types::Color;

/// One parsed declaration, value kept as serialized CSS text so later
/// passes can rewrite it without re-modelling every property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// One style rule with a single simple selector. Rules with selector
/// lists are split into one entry per selector; `order` preserves the
/// source position for cascade tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    pub selector: SimpleSelector,
    pub declarations: Vec<Declaration>,
    pub order: usize,
}

/// Compound selector restricted to the forms report templates and
/// injected overrides use: optional tag, classes, `:root`, and
/// `[attr*="needle"]`. Combinators and other pseudo-classes are
/// rejected at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleSelector {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub is_root: bool,
    pub attr_contains: Vec<(String, String)>,
}

/// Element facts a selector is matched against. `style_text` is the
/// serialized inline declaration list, which is what substring
/// attribute selectors on `style` see.
#[derive(Debug, Clone)]
pub struct ElementProfile<'a> {
    pub tag: &'a str,
    pub classes: &'a [String],
    pub is_root: bool,
    pub style_text: String,
}

impl SimpleSelector {
    pub fn parse(raw: &str) -> Option<SimpleSelector> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let mut selector = SimpleSelector::default();
        let bytes = raw.as_bytes();
        let mut at = 0;
        while at < bytes.len() {
            match bytes[at] {
                b'*' => at += 1,
                b'.' => {
                    let (name, next) = read_identifier(raw, at + 1)?;
                    selector.classes.push(name);
                    at = next;
                }
                b':' => {
                    let (name, next) = read_identifier(raw, at + 1)?;
                    if !name.eq_ignore_ascii_case("root") {
                        return None;
                    }
                    selector.is_root = true;
                    at = next;
                }
                b'[' => {
                    let close = raw[at..].find(']')? + at;
                    let body = &raw[at + 1..close];
                    let (attr, needle) = body.split_once("*=")?;
                    let needle = needle.trim().trim_matches('"').trim_matches('\'');
                    if attr.trim().is_empty() || needle.is_empty() {
                        return None;
                    }
                    selector
                        .attr_contains
                        .push((attr.trim().to_ascii_lowercase(), needle.to_string()));
                    at = close + 1;
                }
                c if is_identifier_byte(c) => {
                    let (name, next) = read_identifier(raw, at)?;
                    if selector.tag.is_some() {
                        return None;
                    }
                    selector.tag = Some(name.to_ascii_lowercase());
                    at = next;
                }
                _ => return None,
            }
        }
        Some(selector)
    }

    pub fn matches(&self, element: &ElementProfile<'_>) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(element.tag) {
                return false;
            }
        }
        if self.is_root && !element.is_root {
            return false;
        }
        if !self
            .classes
            .iter()
            .all(|class| element.classes.iter().any(|have| have == class))
        {
            return false;
        }
        self.attr_contains.iter().all(|(attr, needle)| {
            // Only the serialized style attribute is observable here.
            attr == "style" && element.style_text.contains(needle.as_str())
        })
    }

    /// Class-level count first, then tag-level. `:root` and attribute
    /// selectors count at class level, the universal selector at none.
    pub fn specificity(&self) -> (u32, u32) {
        let class_level =
            self.classes.len() as u32 + self.attr_contains.len() as u32 + u32::from(self.is_root);
        let tag_level = u32::from(self.tag.is_some());
        (class_level, tag_level)
    }
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

fn read_identifier(raw: &str, from: usize) -> Option<(String, usize)> {
    let bytes = raw.as_bytes();
    let mut end = from;
    while end < bytes.len() && is_identifier_byte(bytes[end]) {
        end += 1;
    }
    if end == from {
        return None;
    }
    Some((raw[from..end].to_string(), end))
}

/// Parses a stylesheet into simple rules, numbering them from
/// `order_base`. Selectors outside the supported simple forms and
/// non-style rules are dropped with a counter tick.
pub fn parse_stylesheet_rules(
    css: &str,
    order_base: usize,
    debug: Option<&DebugLogger>,
) -> Vec<StyleRule> {
    let Ok(sheet) = StyleSheet::parse(css, ParserOptions::default()) else {
        if let Some(logger) = debug {
            logger.increment("css.sheet_parse_failed", 1);
        }
        return Vec::new();
    };
    let mut rules = Vec::new();
    let mut order = order_base;
    for rule in sheet.rules.0 {
        let CssRule::Style(style) = rule else {
            if let Some(logger) = debug {
                logger.increment("css.rule_skipped", 1);
            }
            continue;
        };
        let selectors = style
            .selectors
            .to_css_string(PrinterOptions::default())
            .unwrap_or_default();
        let declarations = declarations_of(&style.declarations);
        for selector in selectors.split(',') {
            let Some(parsed) = SimpleSelector::parse(selector) else {
                if let Some(logger) = debug {
                    logger.increment("css.selector_unsupported", 1);
                }
                continue;
            };
            rules.push(StyleRule {
                selector: parsed,
                declarations: declarations.clone(),
                order,
            });
            order += 1;
        }
    }
    rules
}

/// Parses an inline `style` attribute. Unparsable input yields no
/// declarations rather than an error.
pub fn parse_inline_style(raw: &str) -> Vec<Declaration> {
    match StyleAttribute::parse(raw, ParserOptions::default()) {
        Ok(style) => declarations_of(&style.declarations),
        Err(_) => Vec::new(),
    }
}

pub(crate) fn declarations_of(
    block: &lightningcss::declaration::DeclarationBlock<'_>,
) -> Vec<Declaration> {
    let mut out = Vec::new();
    for property in &block.declarations {
        if let Some(declaration) = declaration_from(property, false) {
            out.push(declaration);
        }
    }
    for property in &block.important_declarations {
        if let Some(declaration) = declaration_from(property, true) {
            out.push(declaration);
        }
    }
    out
}

fn declaration_from(property: &Property<'_>, important: bool) -> Option<Declaration> {
    let name = match property {
        Property::Custom(custom) => custom.name.as_ref().to_string(),
        other => other.property_id().name().to_string(),
    };
    let value = property
        .value_to_css_string(PrinterOptions::default())
        .ok()?;
    Some(Declaration {
        property: name,
        value,
        important,
    })
}

/// Serializes declarations back into style-attribute text.
pub fn serialize_declarations(declarations: &[Declaration]) -> String {
    let mut out = String::new();
    for declaration in declarations {
        if !out.is_empty() {
            out.push_str("; ");
        }
        out.push_str(&declaration.property);
        out.push_str(": ");
        out.push_str(&declaration.value);
        if declaration.important {
            out.push_str(" !important");
        }
    }
    out
}

/// Resolves the final value of every property on one element.
/// Precedence, weakest first: matching rules by specificity then
/// source order, inline declarations, important rule declarations,
/// important inline declarations.
pub fn resolved_style(
    rules: &[StyleRule],
    element: &ElementProfile<'_>,
    inline: &[Declaration],
) -> HashMap<String, String> {
    let mut matched: Vec<&StyleRule> = rules
        .iter()
        .filter(|rule| rule.selector.matches(element))
        .collect();
    matched.sort_by_key(|rule| (rule.selector.specificity(), rule.order));

    let mut resolved = HashMap::new();
    for rule in &matched {
        for declaration in &rule.declarations {
            if !declaration.important {
                resolved.insert(declaration.property.clone(), declaration.value.clone());
            }
        }
    }
    for declaration in inline {
        if !declaration.important {
            resolved.insert(declaration.property.clone(), declaration.value.clone());
        }
    }
    for rule in &matched {
        for declaration in &rule.declarations {
            if declaration.important {
                resolved.insert(declaration.property.clone(), declaration.value.clone());
            }
        }
    }
    for declaration in inline {
        if declaration.important {
            resolved.insert(declaration.property.clone(), declaration.value.clone());
        }
    }
    resolved
}

/// Parses a standalone color value. Wide-gamut and relative color
/// functions resolve to `None`, as do `inherit` and `currentcolor`,
/// so callers fall back to inherited state.
pub fn parse_css_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("inherit") {
        return None;
    }
    let declaration = format!("color: {value}");
    let parsed = StyleAttribute::parse(&declaration, ParserOptions::default()).ok()?;
    let block = &parsed.declarations;
    for property in block.declarations.iter().chain(&block.important_declarations) {
        if let Property::Color(color) = property {
            return css_color_to_color(color);
        }
    }
    None
}

fn css_color_to_color(color: &CssColor) -> Option<Color> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = rgba.alpha as f32 / 255.0;
        // Preblend over white until alpha fills are supported directly.
        let r = (rgba.red as f32 / 255.0) * alpha + (1.0 - alpha);
        let g = (rgba.green as f32 / 255.0) * alpha + (1.0 - alpha);
        let b = (rgba.blue as f32 / 255.0) * alpha + (1.0 - alpha);
        return Some(Color::rgb(r, g, b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile<'a>(
        tag: &'a str,
        classes: &'a [String],
        is_root: bool,
        style_text: &str,
    ) -> ElementProfile<'a> {
        ElementProfile {
            tag,
            classes,
            is_root,
            style_text: style_text.to_string(),
        }
    }

    #[test]
    fn parses_tag_class_and_root_selectors() {
        let selector = SimpleSelector::parse("div.kpi-tile.text-blue-500").unwrap();
        assert_eq!(selector.tag.as_deref(), Some("div"));
        assert_eq!(selector.classes, vec!["kpi-tile", "text-blue-500"]);

        let root = SimpleSelector::parse(":root").unwrap();
        assert!(root.is_root);

        let attr = SimpleSelector::parse("*[style*=\"oklch\"]").unwrap();
        assert_eq!(
            attr.attr_contains,
            vec![("style".to_string(), "oklch".to_string())]
        );
    }

    #[test]
    fn rejects_combinators_and_unknown_pseudo_classes() {
        assert!(SimpleSelector::parse("div p").is_none());
        assert!(SimpleSelector::parse("a:hover").is_none());
        assert!(SimpleSelector::parse("ul > li").is_none());
    }

    #[test]
    fn matching_requires_all_classes() {
        let selector = SimpleSelector::parse(".a.b").unwrap();
        let both = ["a".to_string(), "b".to_string()];
        let one = ["a".to_string()];
        assert!(selector.matches(&profile("div", &both, false, "")));
        assert!(!selector.matches(&profile("div", &one, false, "")));
    }

    #[test]
    fn style_substring_selector_sees_serialized_inline_text() {
        let selector = SimpleSelector::parse("[style*=\"lab(\"]").unwrap();
        let classes: [String; 0] = [];
        assert!(selector.matches(&profile("div", &classes, false, "color: lab(52% 40 59)")));
        assert!(!selector.matches(&profile("div", &classes, false, "color: #333333")));
    }

    #[test]
    fn class_outranks_tag_specificity() {
        let tag = SimpleSelector::parse("div").unwrap();
        let class = SimpleSelector::parse(".muted").unwrap();
        assert!(class.specificity() > tag.specificity());
    }

    #[test]
    fn stylesheet_rules_are_split_and_numbered() {
        let rules = parse_stylesheet_rules(
            ".a, .b { color: #111111; } div { color: #222222; }",
            5,
            None,
        );
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].order, 5);
        assert_eq!(rules[1].order, 6);
        assert_eq!(rules[2].order, 7);
        assert_eq!(rules[0].declarations, rules[1].declarations);
    }

    #[test]
    fn custom_properties_keep_their_names() {
        let rules = parse_stylesheet_rules(":root { --color-brand-500: #465fff; }", 0, None);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].declarations[0].property, "--color-brand-500");
    }

    #[test]
    fn important_inline_declarations_are_flagged() {
        let declarations = parse_inline_style("color: #111111 !important; margin-top: 4px");
        let color = declarations
            .iter()
            .find(|d| d.property == "color")
            .unwrap();
        assert!(color.important);
        let margin = declarations
            .iter()
            .find(|d| d.property == "margin-top")
            .unwrap();
        assert!(!margin.important);
    }

    #[test]
    fn cascade_precedence_is_rule_inline_important() {
        let rules = parse_stylesheet_rules(
            ".a { color: #010101; } .a { color: #030303 !important; }",
            0,
            None,
        );
        let classes = ["a".to_string()];
        let element = profile("div", &classes, false, "");

        let inline = parse_inline_style("color: #020202");
        let resolved = resolved_style(&rules, &element, &inline);
        // Rule-important beats plain inline.
        assert_eq!(resolved.get("color").unwrap(), "#030303");

        let inline = parse_inline_style("color: #040404 !important");
        let resolved = resolved_style(&rules, &element, &inline);
        assert_eq!(resolved.get("color").unwrap(), "#040404");
    }

    #[test]
    fn inline_beats_rule_at_normal_weight() {
        let rules = parse_stylesheet_rules(".a { color: #010101; }", 0, None);
        let classes = ["a".to_string()];
        let element = profile("div", &classes, false, "");
        let inline = parse_inline_style("color: #020202");
        let resolved = resolved_style(&rules, &element, &inline);
        assert_eq!(resolved.get("color").unwrap(), "#020202");
    }

    #[test]
    fn later_rule_wins_at_equal_specificity() {
        let rules =
            parse_stylesheet_rules(".a { color: #010101; } .a { color: #020202; }", 0, None);
        let classes = ["a".to_string()];
        let element = profile("div", &classes, false, "");
        let resolved = resolved_style(&rules, &element, &[]);
        assert_eq!(resolved.get("color").unwrap(), "#020202");
    }

    #[test]
    fn srgb_colors_parse_and_wide_gamut_does_not() {
        let blue = parse_css_color("#3b82f6").unwrap();
        assert_eq!(blue.to_rgb8(), (0x3b, 0x82, 0xf6));
        assert!(parse_css_color("rgb(255 0 0)").is_some());
        assert!(parse_css_color("red").is_some());
        assert!(parse_css_color("lab(52% 40 59)").is_none());
        assert!(parse_css_color("oklch(0.6 0.15 250)").is_none());
        assert!(parse_css_color("currentcolor").is_none());
        assert!(parse_css_color("inherit").is_none());
    }

    #[test]
    fn translucent_colors_preblend_over_white() {
        let half_black = parse_css_color("rgb(0 0 0 / 50%)").unwrap();
        let (r, g, b) = half_black.to_rgb8();
        assert!(r > 120 && r < 135);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }
}
