use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:TODO|TBD|FIXME)\b|\[\[[^\]]*\]\]|\{\{[^}]*\}\}|<<[^>]*>>|\[(?:INSERT|PLACEHOLDER)[^\]]*\]",
    )
    .unwrap()
});

/// First unfilled template slot in `text`, as `(line, matched text)`.
///
/// Outputs marked `reject_placeholders` are not accepted while this returns
/// `Some`.
#[must_use]
pub fn find_placeholder(text: &str) -> Option<(usize, String)> {
    text.lines().enumerate().find_map(|(idx, line)| {
        PLACEHOLDER
            .find(line)
            .map(|m| (idx + 1, m.as_str().to_string()))
    })
}
