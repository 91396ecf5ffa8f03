//! Plain-text rendering of page HTML fields
//!
//! Site pages carry their body as HTML (`CanvasContent1`,
//! `LayoutWebpartsContent`). The index only needs the text nodes, one per
//! line, so this is a small tag stripper rather than a DOM parser: every tag
//! acts as a line break, `script`/`style` bodies and comments are dropped,
//! and the handful of entities SharePoint emits are decoded.

/// Elements whose content is never text
const SKIPPED_ELEMENTS: [&str; 2] = ["script", "style"];

/// Converts an HTML fragment into newline-separated text
///
/// Blank lines are removed and each line is trimmed.
pub fn html_to_text(html: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        current.push_str(&rest[..open]);
        rest = &rest[open..];

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map_or("", |end| &after[end + 3..]);
            continue;
        }

        let Some(close) = rest.find('>') else {
            // Unterminated tag: keep it as text
            current.push_str(rest);
            rest = "";
            break;
        };
        let tag = &rest[1..close];
        rest = &rest[close + 1..];
        push_line(&mut lines, &mut current);

        if let Some(name) = skipped_element(tag) {
            rest = skip_past_closing(rest, name);
        }
    }
    current.push_str(rest);
    push_line(&mut lines, &mut current);

    lines.join("\n")
}

fn push_line(lines: &mut Vec<String>, current: &mut String) {
    let text = decode_entities(current.trim());
    let text = text.trim();
    if !text.is_empty() {
        lines.push(text.to_string());
    }
    current.clear();
}

fn skipped_element(tag: &str) -> Option<&'static str> {
    let name = tag
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default();
    SKIPPED_ELEMENTS
        .into_iter()
        .find(|skipped| skipped.eq_ignore_ascii_case(name))
}

fn skip_past_closing<'a>(rest: &'a str, name: &str) -> &'a str {
    let closing = format!("</{name}");
    let lowered = rest.to_ascii_lowercase();
    match lowered.find(&closing) {
        Some(start) => rest[start..].find('>').map_or("", |end| &rest[start + end + 1..]),
        None => "",
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            decode_entity(entity).map(|c| (c, end + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}
