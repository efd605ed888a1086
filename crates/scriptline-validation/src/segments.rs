//! Marker-delimited segments, paragraphs and sentences.
//!
//! Rescue strategies only ever cut or insert at the boundaries exposed here,
//! never at arbitrary character offsets.

/// `true` when `line` is exactly the marker once surrounding whitespace is dropped.
#[must_use]
pub fn is_marker_line(line: &str, marker: &str) -> bool {
    !marker.is_empty() && line.trim() == marker
}

/// Split `text` into the bodies between standalone marker lines.
///
/// Each segment is trimmed of leading/trailing blank lines. Empty segments
/// (two markers in a row, marker at the very start) are kept so the segment
/// count always equals marker count + 1.
#[must_use]
pub fn split_segments(text: &str, marker: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if is_marker_line(line, marker) {
            segments.push(trim_blank_lines(&current));
            current.clear();
        } else {
            current.push(line);
        }
    }
    segments.push(trim_blank_lines(&current));
    segments
}

/// Inverse of [`split_segments`]: segments separated by a blank line, the marker, a blank line.
#[must_use]
pub fn join_segments(segments: &[String], marker: &str) -> String {
    let separator = format!("\n\n{marker}\n\n");
    let mut out = segments.join(&separator);
    out.push('\n');
    out
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// A paragraph: consecutive non-blank, non-marker lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// 1-based line of the paragraph's first line
    pub line: usize,
    /// Lines joined with single spaces, internal whitespace collapsed
    pub normalized: String,
}

#[must_use]
pub fn paragraphs(text: &str, marker: &str) -> Vec<Paragraph> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut words: Vec<&str> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() || is_marker_line(line, marker) {
            if !words.is_empty() {
                out.push(Paragraph {
                    line: start,
                    normalized: words.join(" "),
                });
                words.clear();
            }
            continue;
        }
        if words.is_empty() {
            start = idx + 1;
        }
        words.extend(line.split_whitespace());
    }
    if !words.is_empty() {
        out.push(Paragraph {
            line: start,
            normalized: words.join(" "),
        });
    }
    out
}

/// Split a passage into sentences, each keeping its terminator and any
/// closing quotes/brackets that follow it. A trailing fragment without a
/// terminator is returned as its own final piece.
#[must_use]
pub fn sentences<'a>(text: &'a str, is_end: impl Fn(char) -> bool) -> Vec<&'a str> {
    const CLOSERS: &[char] = &['"', '”', '’', '\'', '」', '』', ')', '）'];

    let mut out = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if !is_end(c) || CLOSERS.contains(&c) {
            continue;
        }
        let mut end = idx + c.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if is_end(next) || CLOSERS.contains(&next) {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let piece = text[start..end].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        start = end;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
