//! Code extraction from free-form LLM responses.
//!
//! Responses are prose with (hopefully) a fenced code block. Extraction
//! tries fences first and falls back to the longest contiguous span that
//! reads as a program. The rationale is the prose preceding the code.

use crate::domain::ports::GeneratedArtifact;

/// Recover a code artifact from a raw response. `None` when nothing in the
/// text is extractable as a program.
pub fn extract_artifact(raw: &str) -> Option<GeneratedArtifact> {
    if let Some((start, code)) = longest_fenced_block(raw) {
        let rationale = raw[..start].trim().to_string();
        return Some(GeneratedArtifact {
            source_code: code,
            rationale,
            raw_response: raw.to_string(),
        });
    }

    let (start, code) = longest_code_span(raw)?;
    let rationale = raw[..start].trim().to_string();
    Some(GeneratedArtifact {
        source_code: code,
        rationale,
        raw_response: raw.to_string(),
    })
}

/// The longest fenced block and the byte offset where its fence opens.
fn longest_fenced_block(raw: &str) -> Option<(usize, String)> {
    let mut best: Option<(usize, String)> = None;
    let mut search_from = 0;

    while let Some(rel) = raw[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_fence = fence_start + 3;
        // Skip the info string (language tag) up to the end of the line.
        let body_start = match raw[after_fence..].find('\n') {
            Some(nl) => after_fence + nl + 1,
            None => break,
        };
        let Some(close_rel) = raw[body_start..].find("```") else {
            break;
        };
        let body = raw[body_start..body_start + close_rel].trim_end();
        if !body.trim().is_empty()
            && best.as_ref().map_or(true, |(_, b)| body.len() > b.len())
        {
            best = Some((fence_start, body.to_string()));
        }
        search_from = body_start + close_rel + 3;
    }

    best
}

/// Heuristic program detector for fence-less responses: the longest
/// blank-line-delimited chunk whose lines mostly look like statements.
fn longest_code_span(raw: &str) -> Option<(usize, String)> {
    let mut best: Option<(usize, &str)> = None;
    let mut offset = 0;

    for chunk in raw.split("\n\n") {
        let lines: Vec<&str> = chunk.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() >= 2 {
            let code_lines = lines.iter().filter(|l| looks_like_code(l)).count();
            if code_lines * 2 > lines.len()
                && best.map_or(true, |(_, b)| chunk.len() > b.len())
            {
                best = Some((offset, chunk));
            }
        }
        offset += chunk.len() + 2;
    }

    best.map(|(start, chunk)| (start, chunk.trim().to_string()))
}

fn looks_like_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ")
        || trimmed.starts_with("from ")
        || trimmed.starts_with("def ")
        || trimmed.starts_with("class ")
        || trimmed.starts_with("for ")
        || trimmed.starts_with("while ")
        || trimmed.starts_with("if ")
        || trimmed.starts_with('#')
        || trimmed.contains('=')
        || trimmed.ends_with(':')
        || trimmed.ends_with(';')
        || trimmed.contains("(")
}
