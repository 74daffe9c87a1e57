use serde::{Deserialize, Serialize};
use loom_model::{FunctionCall, Message, MessageContent, Role};

/// Parsed representation of a conversation markdown file.
#[derive(Debug, Default)]
pub struct ParsedConversation {
    /// Optional H1 title of the conversation.
    pub title: Option<String>,
    /// All complete turns that form the conversation history.
    /// This is ready to pass to `Agent::replace_history_and_submit`.
    pub history: Vec<Message>,
    /// If the file ends with a `## User` section that has no corresponding
    /// `## Loom` response, it is treated as pending input to execute.
    pub pending_user_input: Option<String>,
}

/// A raw H2 section parsed from the markdown file.
#[derive(Debug)]
struct Section {
    /// The heading text after `## `, e.g. "User", "Loom", "Tool", "Tool Result"
    heading: SectionKind,
    /// The raw content between this heading and the next.
    content: String,
}

#[derive(Debug, PartialEq, Eq, Clone)]
enum SectionKind {
    User,
    Loom,
    Tool,
    ToolResult,
    Unknown(String),
}

impl SectionKind {
    fn from_str(s: &str) -> Self {
        match s.trim() {
            "User" => SectionKind::User,
            "Loom" => SectionKind::Loom,
            "Tool" => SectionKind::Tool,
            "Tool Result" => SectionKind::ToolResult,
            other => SectionKind::Unknown(other.to_string()),
        }
    }
}

/// JSON envelope stored inside a `## Tool` section.
#[derive(Debug, Deserialize, Serialize)]
struct ToolCallEnvelope {
    pub tool_call_id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Parse an error with context.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("orphaned ## Tool Result without a preceding ## Tool section")]
    OrphanedToolResult,
    #[error("## Tool section contains invalid JSON: {0}")]
    InvalidToolJson(String),
    #[error("## Tool section missing JSON code block")]
    MissingToolJson,
}

/// Parse a conversation markdown file into history messages and optional pending input.
///
/// The format uses H2 sections as turn boundaries:
///
/// ```markdown
/// # Optional title
///
/// ## User
/// Question or task here.
///
/// ## Loom
/// Agent response here.
///
/// ## Tool
/// ```json
/// {"tool_call_id": "call_001", "name": "read_file", "args": {"path": "/src/main.rs"}}
/// ```
///
/// ## Tool Result
/// ```text
/// file contents
/// ```
///
/// If the file ends with a `## User` section, it is returned as `pending_user_input`
/// and not included in `history`.
pub fn parse_conversation(markdown: &str) -> Result<ParsedConversation, ParseError> {
    let (title, sections) = split_sections(markdown);
    convert_sections_to_conversation(title, sections)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Split markdown into an optional H1 title and a list of H2 sections.
///
/// Only the four recognized section headings (`User`, `Loom`, `Tool`,
/// `Tool Result`) are treated as structural boundaries.  Any other `## …`
/// line — for example a heading the agent wrote inside its own response —
/// is kept as literal content within the current section.
fn split_sections(markdown: &str) -> (Option<String>, Vec<Section>) {
    let mut title: Option<String> = None;
    let mut sections: Vec<Section> = Vec::new();
    let mut current_heading: Option<SectionKind> = None;
    let mut current_content = String::new();
    let mut preamble = String::new();

    for line in markdown.lines() {
        // H1 — title, only before any section starts
        if let Some(h1) = line.strip_prefix("# ").filter(|_| !line.starts_with("## ")) {
            if current_heading.is_none() && preamble.is_empty() && title.is_none() {
                title = Some(h1.trim().to_string());
                continue;
            }
        }

        // H2 — only start a new section if the heading is a recognized kind
        if let Some(h2) = line.strip_prefix("## ") {
            let kind = SectionKind::from_str(h2.trim());
            if !matches!(kind, SectionKind::Unknown(_)) {
                // Flush previous section
                if let Some(heading) = current_heading.take() {
                    sections.push(Section {
                        heading,
                        content: current_content.trim_matches('\n').to_string(),
                    });
                } else {
                    preamble.push_str(&current_content);
                }
                current_content = String::new();
                current_heading = Some(kind);
                continue;
            }
            // Unknown H2 — fall through and treat as content
        }

        current_content.push_str(line);
        current_content.push('\n');
    }

    // Flush final section
    if let Some(heading) = current_heading {
        sections.push(Section {
            heading,
            content: current_content.trim_matches('\n').to_string(),
        });
    }

    (title, sections)
}

/// Convert a list of sections into a `ParsedConversation`.
fn convert_sections_to_conversation(
    title: Option<String>,
    sections: Vec<Section>,
) -> Result<ParsedConversation, ParseError> {
    let mut history: Vec<Message> = Vec::new();
    let mut pending_tool_call_id: Option<String> = None;
    let mut iter = sections.into_iter().peekable();

    while let Some(section) = iter.next() {
        match &section.heading {
            SectionKind::Unknown(name) => {
                tracing::warn!(heading = %name, "skipping unknown H2 section in conversation file");
            }

            SectionKind::User => {
                let content = section.content.clone();
                // If this is the last section and there is no next section,
                // we'll handle it after the loop.
                if iter.peek().is_none() {
                    // Last section — treat as pending input
                    return Ok(ParsedConversation {
                        title,
                        history,
                        pending_user_input: Some(content.trim().to_string()),
                    });
                }
                history.push(Message::user(content.trim()));
            }

            SectionKind::Loom => {
                history.push(Message::assistant(section.content.trim()));
            }

            SectionKind::Tool => {
                let envelope = parse_tool_envelope(&section.content)?;
                pending_tool_call_id = Some(envelope.tool_call_id.clone());
                history.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::ToolCall {
                        tool_call_id: envelope.tool_call_id,
                        function: FunctionCall {
                            name: envelope.name,
                            arguments: envelope.args.to_string(),
                        },
                    },
                });
            }

            SectionKind::ToolResult => {
                let call_id = match pending_tool_call_id.take() {
                    Some(id) => id,
                    None => return Err(ParseError::OrphanedToolResult),
                };
                let content = extract_code_block_content(&section.content);
                history.push(Message::tool_result(call_id, content.trim()));
            }
        }
    }

    Ok(ParsedConversation {
        title,
        history,
        pending_user_input: None,
    })
}

/// Parse a `## Tool` section body to extract the JSON envelope.
/// Expects a ```json code block anywhere in the content.
fn parse_tool_envelope(content: &str) -> Result<ToolCallEnvelope, ParseError> {
    let json_str = extract_fenced_block(content, "json")
        .or_else(|| extract_fenced_block(content, ""))
        .ok_or(ParseError::MissingToolJson)?;

    serde_json::from_str::<ToolCallEnvelope>(&json_str)
        .map_err(|e| ParseError::InvalidToolJson(e.to_string()))
}

/// Extract the content of the first fenced code block with the given language tag.
/// If `lang` is empty, matches any code fence (` ``` ` with no language).
fn extract_fenced_block(content: &str, lang: &str) -> Option<String> {
    let open_marker = if lang.is_empty() {
        "```".to_string()
    } else {
        format!("```{lang}")
    };

    let mut in_block = false;
    let mut result = String::new();

    for line in content.lines() {
        if !in_block {
            let trimmed = line.trim();
            if lang.is_empty() {
                // Match ``` with no language suffix (just whitespace/end)
                if trimmed == "```" {
                    in_block = true;
                    continue;
                }
            } else if trimmed == open_marker.as_str() || trimmed.starts_with(&format!("{open_marker} ")) {
                in_block = true;
                continue;
            }
        } else {
            if line.trim() == "```" {
                return Some(result);
            }
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(line);
        }
    }

    if in_block { Some(result) } else { None }
}

/// Extract the content of a code block from section body (for Tool Result).
/// If the content is wrapped in a code fence, return the inner text; otherwise
/// return the full content as-is.
fn extract_code_block_content(content: &str) -> String {
    if let Some(inner) = extract_fenced_block(content, "") {
        return inner;
    }
    // Try any language-tagged block
    for line in content.lines() {
        if line.trim().starts_with("```") && line.trim().len() > 3 {
            let lang = line.trim().trim_start_matches('`').trim();
            if let Some(inner) = extract_fenced_block(content, lang) {
                return inner;
            }
        }
    }
    content.to_string()
}

// ── Serializer ────────────────────────────────────────────────────────────────

/// Serialize a slice of messages into conversation markdown sections.
///
/// The output is suitable for appending to an existing conversation file.
/// System messages are skipped (they are injected by the agent automatically).
pub fn serialize_conversation_turn(messages: &[Message]) -> String {
    let mut result = String::new();
    for msg in messages {
        result.push_str(&message_to_section(msg));
    }
    result
}

/// Serialize the entire conversation into a fresh markdown file, including
/// the conversation title if provided.
pub fn serialize_conversation(title: Option<&str>, messages: &[Message]) -> String {
    let mut result = String::new();
    if let Some(t) = title {
        result.push_str(&format!("# {t}\n\n"));
    }
    result.push_str(&serialize_conversation_turn(messages));
    result
}

fn message_to_section(msg: &Message) -> String {
    match (&msg.role, &msg.content) {
        (Role::System, _) => String::new(), // skip — agent injects system message

        (Role::User, MessageContent::Text(t)) => {
            format!("## User\n{}\n\n", t.trim())
        }

        (Role::Assistant, MessageContent::Text(t)) => {
            format!("## Loom\n{}\n\n", t.trim())
        }

        (Role::Assistant, MessageContent::ToolCall { tool_call_id, function }) => {
            let args_value: serde_json::Value =
                serde_json::from_str(&function.arguments).unwrap_or(serde_json::Value::Null);
            let envelope = serde_json::json!({
                "tool_call_id": tool_call_id,
                "name": function.name,
                "args": args_value,
            });
            let pretty = serde_json::to_string_pretty(&envelope).unwrap_or_default();
            format!("## Tool\n```json\n{pretty}\n```\n\n")
        }

        (Role::Tool, MessageContent::ToolResult { content, .. }) => {
            format!("## Tool Result\n```\n{content}\n```\n\n")
        }

        _ => String::new(),
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
