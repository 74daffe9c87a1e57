// SPDX-License-Identifier: Apache-2.0
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use tracing::debug;

use crate::{Step, StepOptions, StepQueue};

/// The result of parsing a workflow markdown document.
///
/// ```markdown
/// # Title                          ← title field
///
/// Preamble text before first ##    ← system_prompt_append field
///
/// ## Step label                    ← first step
/// <!-- loom: mode=research -->
/// Step body…
/// ```
pub struct ParsedWorkflow {
    /// Text of the first `#` H1 heading, used as the conversation title.
    pub title: Option<String>,
    /// Body text between the H1 and the first `##` heading.
    /// Appended to the agent system prompt, not sent as a user message.
    pub system_prompt_append: Option<String>,
    /// The ordered queue of steps derived from `##` H2 sections.
    pub steps: StepQueue,
}

/// Parse a markdown workflow document into a [`ParsedWorkflow`].
///
/// Rules:
/// - The first `#` H1 heading becomes the conversation title and is not
///   included in any step or in the system prompt append.
/// - Content between the H1 (or document start) and the first `##` H2
///   heading is collected as `system_prompt_append`.
/// - Every `##` H2 heading starts a new step; the heading text is the label.
/// - `#` and `###`+ headings are kept as body text inside the current step.
/// - `<!-- loom: key=value ... -->` comments set per-step options and are
///   removed from the step body.
/// - All other HTML comments are stripped from output.
/// - **Fallback**: if the document contains no `##` H2 headings, the entire
///   body (after the H1, if any) is returned as a single unlabelled step so
///   that plain-text piped input continues to work.
pub fn parse_workflow(input: &str) -> ParsedWorkflow {
    let mut title: Option<String> = None;
    let mut preamble = String::new();
    let mut steps: Vec<Step> = Vec::new();

    // Phase tracking
    let mut inside_h1 = false;
    let mut h1_text = String::new();
    let mut h1_done = false; // once H1 is consumed, preamble collection begins
    let mut in_step = false; // true once the first H2 has been seen

    let mut current_label: Option<String> = None;
    let mut current_body = String::new();
    let mut current_opts = StepOptions::default();
    let mut inside_h2 = false;
    let mut h2_text = String::new();

    let parser = Parser::new(input);

    for event in parser {
        match event {
            // ── H1: title ────────────────────────────────────────────────────
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => {
                inside_h1 = true;
                h1_text.clear();
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                inside_h1 = false;
                if !h1_done {
                    title = Some(h1_text.trim().to_string());
                    h1_done = true;
                }
                // Either way, do not add H1 text to preamble or step body.
            }
            Event::Text(t) | Event::Code(t) if inside_h1 => {
                h1_text.push_str(&t);
            }

            // ── H2: step boundary ────────────────────────────────────────────
            Event::Start(Tag::Heading {
                level: HeadingLevel::H2,
                ..
            }) => {
                if in_step {
                    flush_step(
                        &mut steps,
                        current_label.take(),
                        &mut current_body,
                        std::mem::take(&mut current_opts),
                    );
                }
                inside_h2 = true;
                h2_text.clear();
                in_step = true;
            }
            Event::End(TagEnd::Heading(HeadingLevel::H2)) => {
                inside_h2 = false;
                current_label = Some(h2_text.trim().to_string());
            }
            Event::Text(t) | Event::Code(t) if inside_h2 => {
                h2_text.push_str(&t);
            }

            // ── Body text ────────────────────────────────────────────────────
            Event::Text(t) => {
                if in_step {
                    current_body.push_str(&t);
                } else {
                    h1_done = true; // any text before H1 or after H1 counts
                    preamble.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_step {
                    current_body.push('\n');
                } else {
                    preamble.push('\n');
                }
            }
            Event::Code(t) => {
                let s = format!("`{t}`");
                if in_step {
                    current_body.push_str(&s);
                } else {
                    preamble.push_str(&s);
                }
            }
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                if in_step {
                    current_body.push_str("\n\n");
                } else {
                    preamble.push_str("\n\n");
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                let s = "```\n";
                if in_step {
                    current_body.push_str(s);
                } else {
                    preamble.push_str(s);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                let s = "```\n\n";
                if in_step {
                    current_body.push_str(s);
                } else {
                    preamble.push_str(s);
                }
            }

            // ── Loom directives and HTML comments ────────────────────────────
            Event::Html(html) => {
                let trimmed = html.trim();
                // Pass every HTML comment to the parser; it handles both the
                // explicit `<!-- loom: key=val -->` form and the implicit
                // `<!-- key=val -->` form (when known keys are present).
                // Non-option comments (no '=' or no known key) are ignored
                // inside parse_loom_comment_into.
                if in_step && trimmed.starts_with("<!--") && trimmed.contains("-->") {
                    parse_loom_comment_into(trimmed, &mut current_opts);
                }
                // All HTML comments are stripped from the step body output.
            }

            _ => {}
        }
    }

    // Final flush of the last step (if any)
    if in_step {
        flush_step(
            &mut steps,
            current_label,
            &mut current_body,
            std::mem::take(&mut current_opts),
        );
    }

    debug!(steps = steps.len(), "parsed workflow steps");

    // Fallback: no H2 sections found → treat entire body as one unlabelled
    // step so plain-text stdin continues to work.
    if steps.is_empty() {
        let content = if preamble.trim().is_empty() {
            input.trim().to_string()
        } else {
            preamble.trim().to_string()
        };
        steps.push(Step {
            label: None,
            content,
            options: StepOptions::default(),
        });
        return ParsedWorkflow {
            title,
            system_prompt_append: None,
            steps: StepQueue::from(steps),
        };
    }

    let system_prompt_append = {
        let t = preamble.trim().to_string();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    };

    ParsedWorkflow {
        title,
        system_prompt_append,
        steps: StepQueue::from(steps),
    }
}

/// Parse a `<!-- loom: key=value key2=value2 -->` or `<!-- key=value key2=value2 -->` comment into `opts`.
///
/// Supports both formats:
/// - `<!-- loom: mode=agent model=gpt-4o -->` (explicit loom: prefix)
/// - `<!-- mode=agent model=gpt-4o -->` (implicit, auto-detected by presence of known keys)
fn parse_loom_comment_into(comment: &str, opts: &mut StepOptions) {
    // Try explicit <!-- loom: ... --> format first
    let (start, end) = if let Some(i) = comment.find("<!-- loom:") {
        let start = i + "<!-- loom:".len();
        match comment[start..].find("-->") {
            Some(e) => (start, start + e),
            None => return,
        }
    } else {
        // Try implicit <!-- key=value --> format (must contain at least one known key)
        if let Some(start_idx) = comment.find("<!--") {
            let start = start_idx + "<!--".len();
            match comment[start..].find("-->") {
                Some(e) => {
                    let potential_content = comment[start..start + e].trim();
                    // Only parse if the content looks like pure key=value pairs:
                    // every whitespace-split token must contain '=' (no bare words
                    // like "step:"), and at least one must be a known loom key.
                    // This keeps "<!-- model=gpt-4o -->" working while correctly
                    // ignoring old formats like "<!-- step: mode=research -->".
                    let all_kv = potential_content
                        .split_whitespace()
                        .all(|t| t.contains('='));
                    let has_known_key = potential_content.split_whitespace().any(|t| {
                        matches!(
                            t.split_once('=').map(|(k, _)| k),
                            Some("mode" | "model" | "provider" | "timeout" | "cache_key")
                        )
                    });
                    if potential_content.contains('=') && all_kv && has_known_key {
                        (start, start + e)
                    } else {
                        return; // Not a step options comment
                    }
                }
                None => return,
            }
        } else {
            return;
        }
    };

    let inner = comment[start..end].trim();

    for token in inner.split_whitespace() {
        if let Some((key, val)) = token.split_once('=') {
            let val = val.trim_matches('"').trim_matches('\'');
            match key {
                "mode" => opts.mode = Some(val.to_string()),
                "provider" => opts.provider = Some(val.to_string()),
                "model" => opts.model = Some(val.to_string()),
                "timeout" => opts.timeout_secs = val.parse().ok(),
                "cache_key" => opts.cache_key = Some(val.to_string()),
                _ => {}
            }
        }
    }
}

fn flush_step(out: &mut Vec<Step>, label: Option<String>, body: &mut String, options: StepOptions) {
    let content = body.trim().to_string();
    body.clear();

    // Skip completely empty steps with no label
    if content.is_empty() && label.is_none() {
        return;
    }

    // If a step only has a label, use the label as content
    let content = if content.is_empty() {
        label.clone().unwrap_or_default()
    } else {
        content
    };

    out.push(Step {
        label,
        content,
        options,
    });
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
