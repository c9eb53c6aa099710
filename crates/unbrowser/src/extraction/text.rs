//! Plain-text rendition of extracted markdown.

/// Strip markdown markup, keeping the words. Headings, list markers,
/// quotes, emphasis, inline code and link targets are removed; runs of
/// blank lines collapse to one.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in markdown.lines() {
        let line = strip_block_marker(line.trim());
        let text = strip_inline(line);
        let text = text.trim();
        if text.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }
        lines.push(text.to_string());
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn strip_block_marker(line: &str) -> &str {
    let unheaded = line.trim_start_matches('#');
    if unheaded.len() != line.len() && (unheaded.is_empty() || unheaded.starts_with(' ')) {
        return unheaded.trim_start();
    }
    for marker in ["> ", "- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest;
        }
    }
    line
}

fn strip_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("**") || rest.starts_with("__") {
            rest = &rest[2..];
            continue;
        }
        if c == '`' {
            rest = &rest[1..];
            continue;
        }
        let link = rest
            .strip_prefix("![")
            .or_else(|| rest.strip_prefix('['))
            .and_then(link_parts);
        if let Some((label, tail)) = link {
            out.push_str(label);
            rest = tail;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Split `label](target)tail` into `(label, tail)`.
fn link_parts(after_bracket: &str) -> Option<(&str, &str)> {
    let close = after_bracket.find(']')?;
    let target = after_bracket[close + 1..].strip_prefix('(')?;
    let end = target.find(')')?;
    Some((&after_bracket[..close], &target[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_structure_and_inline_markup() {
        let md = "# What is Ownership?\n\n\n\
                  Rust uses **ownership** and `borrowing`.\n\n\
                  - one rule\n- [another](https://example.com/rules) rule\n\n\
                  > quoted ![diagram](a.png)\n";
        assert_eq!(
            markdown_to_text(md),
            "What is Ownership?\n\nRust uses ownership and borrowing.\n\none rule\nanother rule\n\nquoted diagram"
        );
    }

    #[test]
    fn test_leaves_plain_text_and_stray_brackets_alone() {
        assert_eq!(markdown_to_text("#hashtag [not a link] a_b"), "#hashtag [not a link] a_b");
        assert_eq!(markdown_to_text(""), "");
    }
}
