//! Post-processing of model output before it is shown and narrated.

use once_cell::sync::Lazy;
use regex::Regex;

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("Invalid regex pattern"));

static LINE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(#{1,6}\s*|>\s*|[-*+]\s+)").expect("Invalid regex pattern"));

static UNDERSCORE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b_{1,2}([^_\n]+?)_{1,2}\b").expect("Invalid regex pattern"));

static PICTOGRAPHS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\u{FE0F}\u{200D}]").expect("Invalid regex pattern")
});

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("Invalid regex pattern"));

/// Strip markup that speech synthesis would read aloud or choke on.
/// Line structure is kept so numbered steps stay on their own lines.
pub fn sanitize_for_speech(text: &str) -> String {
    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = PICTOGRAPHS.replace_all(&text, "");

    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        if raw.trim_start().starts_with("```") {
            continue;
        }

        let line = LINE_PREFIX.replace(raw, "");
        let line = UNDERSCORE_EMPHASIS.replace_all(&line, "$1");
        let line: String = line
            .chars()
            .filter(|c| !matches!(c, '*' | '`' | '#' | '~' | '|' | '<' | '>'))
            .collect();
        let line = SPACES.replace_all(line.trim(), " ").into_owned();

        // Collapse runs of blank lines into one
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Pull "1. ...", "2) ..." and "Step 3: ..." lines out of guidance text
pub fn extract_steps(text: &str) -> Option<Vec<String>> {
    let steps: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            if line.starts_with(|c: char| c.is_ascii_digit()) {
                let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
                let rest = rest
                    .strip_prefix(|c: char| matches!(c, '.' | ')' | ':'))
                    .unwrap_or(rest);
                Some(rest.trim().to_string())
            } else if line.to_lowercase().starts_with("step") {
                let rest = line.split_once(':').map(|(_, r)| r).unwrap_or(line);
                Some(rest.trim().to_string())
            } else {
                None
            }
        })
        .filter(|step| !step.is_empty())
        .collect();

    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}
