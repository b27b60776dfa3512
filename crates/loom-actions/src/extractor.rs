//! Artifact extraction
//!
//! Assistant messages carry their directives inline with prose:
//!
//! ```text
//! <artifact id="todo" title="Todo app">
//!   <action type="file" path="src/main.js">
//!   console.log("hi");
//!   </action>
//!   <action type="shell">npm install</action>
//! </artifact>
//! ```
//!
//! This is not document markup. Action bodies are raw text up to the
//! matching close tag, so file contents containing their own tags survive
//! untouched. Tag and attribute names match case-insensitively;
//! `boltArtifact`, `boltAction` and `filePath` are accepted as aliases.

use crate::action::{Action, Artifact, SkippedAction};

const ARTIFACT_TAGS: &[&str] = &["artifact", "boltartifact"];
const ACTION_TAGS: &[&str] = &["action", "boltaction"];

/// Extract the first artifact block; an empty artifact when there is none
pub fn extract_artifact(text: &str) -> Artifact {
    find_artifact(text).unwrap_or_default()
}

/// Extract the first artifact block, or `None` if the text contains none.
///
/// Unusable action elements are recorded in `Artifact::skipped`. A block
/// without a closing tag yields the actions that were complete.
pub fn find_artifact(text: &str) -> Option<Artifact> {
    let open = find_open_tag(text, 0, ARTIFACT_TAGS)?;

    let mut artifact = Artifact {
        id: open.attr("id").map(str::to_string),
        title: open.attr("title").map(str::to_string),
        ..Artifact::default()
    };
    if open.self_closing {
        return Some(artifact);
    }

    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let mut pos = open.end;
    let mut index = 0;

    loop {
        let Some(tag) = next_tag(text, pos) else {
            tracing::warn!(
                actions = artifact.actions.len(),
                "Artifact block is not terminated"
            );
            break;
        };
        pos = tag.end;

        if tag.closing && tag.is_one_of(ARTIFACT_TAGS) {
            break;
        }
        if tag.closing || !tag.is_one_of(ACTION_TAGS) {
            continue;
        }

        let body = if tag.self_closing {
            ""
        } else {
            match find_close_tag(&lower, tag.end, &tag.name) {
                Some((body_end, after)) => {
                    pos = after;
                    &text[tag.end..body_end]
                }
                None => {
                    tracing::warn!(index, "Action element is not terminated, dropping it");
                    break;
                }
            }
        };

        match build_action(&tag, body) {
            Ok(action) => {
                tracing::debug!(index, "Extracted {}", action.describe());
                artifact.actions.push(action);
            }
            Err(reason) => {
                tracing::warn!(index, "Skipping action: {}", reason);
                artifact.skipped.push(SkippedAction { index, reason });
            }
        }
        index += 1;
    }

    Some(artifact)
}

fn build_action(tag: &Tag, body: &str) -> Result<Action, String> {
    let kind = tag.attr("type").map(|t| t.trim().to_ascii_lowercase());

    match kind.as_deref() {
        Some("file") => {
            let path = tag
                .attr("path")
                .or_else(|| tag.attr("filepath"))
                .map(str::trim)
                .unwrap_or("");
            if path.is_empty() {
                return Err("file action without a path".to_string());
            }
            let content = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            Ok(Action::file(path, content))
        }
        Some("shell") => {
            let command = body.trim();
            if command.is_empty() {
                return Err("empty shell command".to_string());
            }
            Ok(Action::shell(command))
        }
        Some(other) => Err(format!("unknown action type '{}'", other)),
        None => Err("action without a type".to_string()),
    }
}

#[derive(Debug)]
struct Tag {
    /// Lowercased element name
    name: String,
    /// Lowercased attribute names with raw values
    attrs: Vec<(String, String)>,
    closing: bool,
    self_closing: bool,
    /// Byte offset just past the closing `>`
    end: usize,
}

impl Tag {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn is_one_of(&self, names: &[&str]) -> bool {
        names.contains(&self.name.as_str())
    }
}

fn find_open_tag(text: &str, from: usize, names: &[&str]) -> Option<Tag> {
    let mut pos = from;
    loop {
        let tag = next_tag(text, pos)?;
        if !tag.closing && tag.is_one_of(names) {
            return Some(tag);
        }
        pos = tag.end;
    }
}

/// Next well-formed tag at or after `from`; stray `<` characters are skipped
fn next_tag(text: &str, from: usize) -> Option<Tag> {
    let mut pos = from;
    while let Some(offset) = text.get(pos..)?.find('<') {
        let start = pos + offset;
        if let Some(tag) = parse_tag(text, start) {
            return Some(tag);
        }
        pos = start + 1;
    }
    None
}

fn parse_tag(text: &str, start: usize) -> Option<Tag> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = start + 1;

    let closing = bytes.get(i) == Some(&b'/');
    if closing {
        i += 1;
    }

    if !bytes.get(i)?.is_ascii_alphabetic() {
        return None;
    }
    let name_start = i;
    while i < len && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = text[name_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();
    loop {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match *bytes.get(i)? {
            b'>' => {
                return Some(Tag {
                    name,
                    attrs,
                    closing,
                    self_closing: false,
                    end: i + 1,
                })
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Some(Tag {
                    name,
                    attrs,
                    closing,
                    self_closing: true,
                    end: i + 2,
                })
            }
            _ if closing => return None,
            _ => {}
        }

        let attr_start = i;
        while i < len && is_name_byte(bytes[i]) {
            i += 1;
        }
        if i == attr_start {
            return None;
        }
        let attr_name = text[attr_start..i].to_ascii_lowercase();

        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            attrs.push((attr_name, String::new()));
            continue;
        }
        i += 1;
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let quote = *bytes.get(i)?;
        let value = if quote == b'"' || quote == b'\'' {
            let value_start = i + 1;
            let value_len = text[value_start..].find(quote as char)?;
            i = value_start + value_len + 1;
            &text[value_start..value_start + value_len]
        } else {
            let value_start = i;
            while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                i += 1;
            }
            &text[value_start..i]
        };
        attrs.push((attr_name, value.to_string()));
    }
}

/// Locate `</name>` in the lowercased text; returns (body end, offset past `>`)
fn find_close_tag(lower: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let needle = format!("</{}", name);
    let bytes = lower.as_bytes();
    let mut pos = from;

    while let Some(offset) = lower[pos..].find(&needle) {
        let start = pos + offset;
        let mut i = start + needle.len();
        if i < bytes.len() && is_name_byte(bytes[i]) {
            pos = i;
            continue;
        }
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) == Some(&b'>') {
            return Some((start, i + 1));
        }
        pos = i;
    }
    None
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}
