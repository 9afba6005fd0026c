use crate::debug::DebugLogger;
use crate::html::{RenderNode, RenderTree, StylesheetSource};
use crate::style::{Declaration, StyleRule, parse_stylesheet_rules};

/// Color functions the rasterizer cannot resolve. Matches are function
/// calls only, checked at identifier boundaries so `background-color(`
/// or `collab(` never trip the scan.
pub const UNSUPPORTED_COLOR_FUNCTIONS: [&str; 6] =
    ["oklch", "color", "lab", "lch", "hwb", "device-cmyk"];

const TEXT_FALLBACK: &str = "#374151";
const BACKGROUND_FALLBACK: &str = "#ffffff";
const BORDER_FALLBACK: &str = "#e5e7eb";

/// Fixed-color overrides appended after every other rule. Redefines
/// the custom color variables and utility classes report templates
/// rely on, and forces elements whose inline style still mentions an
/// unsupported color function back to inherited colors.
const OVERRIDE_SHEET: &str = r#"
:root {
  --color-brand-500: #465fff !important;
  --color-brand-600: #3641f5 !important;
  --color-blue-500: #3b82f6 !important;
  --color-blue-100: #dbeafe !important;
  --color-green-500: #10b981 !important;
  --color-green-100: #dcfce7 !important;
  --color-orange-500: #f97316 !important;
  --color-orange-100: #fed7aa !important;
  --color-purple-500: #8b5cf6 !important;
  --color-purple-100: #e9d5ff !important;
  --color-gray-500: #6b7280 !important;
  --color-gray-700: #374151 !important;
  --color-gray-800: #1f2937 !important;
  --color-gray-300: #d1d5db !important;
  --color-gray-400: #9ca3af !important;
}
.text-blue-500 { color: #3b82f6 !important; }
.text-green-500 { color: #10b981 !important; }
.text-orange-500 { color: #f97316 !important; }
.text-purple-500 { color: #8b5cf6 !important; }
.text-gray-500 { color: #6b7280 !important; }
.text-gray-700 { color: #374151 !important; }
.text-gray-800 { color: #1f2937 !important; }
.text-gray-300 { color: #d1d5db !important; }
.text-gray-400 { color: #9ca3af !important; }
.text-white { color: #ffffff !important; }
.text-black { color: #000000 !important; }
.bg-white { background-color: #ffffff !important; }
.bg-gray-50 { background-color: #f9fafb !important; }
.bg-gray-100 { background-color: #f3f4f6 !important; }
.bg-gray-200 { background-color: #e5e7eb !important; }
.bg-blue-100 { background-color: #dbeafe !important; }
.bg-green-100 { background-color: #dcfce7 !important; }
.bg-orange-100 { background-color: #fed7aa !important; }
.bg-purple-100 { background-color: #e9d5ff !important; }
.tile-impressions { background-color: #e8f0fe !important; }
.tile-reach { background-color: #e6f9f0 !important; }
.tile-engagement { background-color: #fff7ed !important; }
.tile-followers { background-color: #f3e8ff !important; }
.border-gray-200 { border-color: #e5e7eb !important; }
.border-gray-300 { border-color: #d1d5db !important; }
*[style*="oklch"], *[style*="color("], *[style*="lab("],
*[style*="lch("], *[style*="hwb("], *[style*="device-cmyk("] {
  color: inherit !important;
  background-color: inherit !important;
  border-color: inherit !important;
}
"#;

/// Capture-ready tree: every reachable declaration is free of
/// unsupported color functions and the override rules are appended
/// last so they win any tie.
#[derive(Debug, Clone)]
pub struct SafeRenderTree {
    pub root: RenderNode,
    pub rules: Vec<StyleRule>,
}

/// True when `value` invokes one of the unsupported color functions.
pub fn contains_unsupported_color(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    UNSUPPORTED_COLOR_FUNCTIONS.iter().any(|name| {
        let needle = format!("{name}(");
        let mut from = 0;
        while let Some(found) = lower[from..].find(&needle) {
            let at = from + found;
            let at_boundary = at == 0 || {
                let previous = lower.as_bytes()[at - 1];
                !(previous.is_ascii_alphanumeric() || previous == b'-' || previous == b'_')
            };
            if at_boundary {
                return true;
            }
            from = at + needle.len();
        }
        false
    })
}

/// Replacement for a declaration whose value cannot be kept. Keyed on
/// the property name: text-ish colors darken to gray, backgrounds go
/// white, borders go light gray, anything else inherits.
pub fn fallback_color_for(property: &str) -> &'static str {
    let property = property.to_ascii_lowercase();
    if property.contains("color") && !property.contains("background") {
        TEXT_FALLBACK
    } else if property.contains("background") {
        BACKGROUND_FALLBACK
    } else if property.contains("border") {
        BORDER_FALLBACK
    } else {
        "inherit"
    }
}

/// Produces a capture-ready copy of `tree`. The input is never
/// mutated; running the pass twice over the same input yields
/// identical output. External stylesheets are skipped with a counter
/// tick since their rules cannot be read.
pub fn sanitize(tree: &RenderTree, debug: Option<&DebugLogger>) -> SafeRenderTree {
    let mut rules: Vec<StyleRule> = Vec::new();
    for sheet in &tree.stylesheets {
        match sheet {
            StylesheetSource::Inline(css) => {
                let mut parsed = parse_stylesheet_rules(css, next_order(&rules), debug);
                for rule in &mut parsed {
                    rewrite_declarations(&mut rule.declarations, debug);
                }
                rules.append(&mut parsed);
            }
            StylesheetSource::External(href) => {
                if let Some(logger) = debug {
                    logger.increment("sanitize.stylesheet_skipped", 1);
                    logger.log_json(&format!(
                        "{{\"event\":\"sanitize.stylesheet_skipped\",\"href\":\"{}\"}}",
                        crate::debug::json_escape(href)
                    ));
                }
            }
        }
    }

    let mut root = tree.root.clone();
    rewrite_tree(&mut root, debug);

    let overrides = parse_stylesheet_rules(OVERRIDE_SHEET, next_order(&rules), debug);
    rules.extend(overrides);

    SafeRenderTree { root, rules }
}

fn next_order(rules: &[StyleRule]) -> usize {
    rules.last().map_or(0, |rule| rule.order + 1)
}

fn rewrite_tree(node: &mut RenderNode, debug: Option<&DebugLogger>) {
    rewrite_declarations(&mut node.inline, debug);
    for child in &mut node.children {
        rewrite_tree(child, debug);
    }
}

fn rewrite_declarations(declarations: &mut [Declaration], debug: Option<&DebugLogger>) {
    for declaration in declarations {
        if contains_unsupported_color(&declaration.value) {
            declaration.value = fallback_color_for(&declaration.property).to_string();
            declaration.important = true;
            if let Some(logger) = debug {
                logger.increment("sanitize.declarations_rewritten", 1);
            }
        }
    }
}
