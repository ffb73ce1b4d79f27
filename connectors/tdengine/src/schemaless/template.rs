//! `{{name}}` placeholder substitution for configured names.

use std::collections::HashMap;

/// One piece of a template: literal text or a placeholder name
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };

        let name = after_open[..end].trim();
        if !is_placeholder_name(name) {
            // not a placeholder; keep the braces and rescan after them
            out.push(Segment::Literal(&rest[..start + 2]));
            rest = after_open;
            continue;
        }

        if start > 0 {
            out.push(Segment::Literal(&rest[..start]));
        }
        out.push(Segment::Placeholder(name));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// Names of all placeholders in order of appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    segments(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Replace every `{{name}}` with its value; unknown names become empty
pub fn replace_placeholders(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                if let Some(value) = values.get(name) {
                    out.push_str(value);
                }
            }
        }
    }
    out
}
