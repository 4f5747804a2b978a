// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-conversation `/` commands.
//!
//! Each command produces a deterministic control result, printed separately
//! from LLM output.  Failures are single-paragraph messages with the error
//! kind and a short hint.

use std::path::Path;

use base64::Engine as _;

use crew_core::ChatSession;
use crew_model::{Part, ThinkingSetting};

/// What the REPL does after a command.
pub enum CommandOutcome {
    /// Keep reading input; the string is the control result to print.
    Continue(String),
}

/// Dispatch one `/command` line.
pub fn handle(
    session: &mut ChatSession,
    pending_parts: &mut Vec<Part>,
    show_thinking: &mut bool,
    line: &str,
) -> CommandOutcome {
    let mut words = line.trim().splitn(2, char::is_whitespace);
    let command = words.next().unwrap_or_default();
    let arg = words.next().map(str::trim).filter(|s| !s.is_empty());

    let text = match command {
        "/clear" => match session.clear() {
            Ok(()) => "started a new conversation".to_string(),
            Err(e) => e.to_string(),
        },
        "/copy" => match session.last_assistant_text() {
            Some(text) => {
                copy_to_clipboard(&text);
                "copied the last reply to the clipboard".to_string()
            }
            None => "nothing to copy yet".to_string(),
        },
        "/file" => match arg {
            Some(path) => match attach_file(Path::new(path)) {
                Ok(part) => {
                    let label = part_label(&part);
                    pending_parts.push(part);
                    format!("attached {label}; it will be sent with your next message")
                }
                Err(e) => e,
            },
            None => "usage: /file <path>".to_string(),
        },
        "/model" => match arg {
            Some(id) => match session.switch_model(id) {
                Ok(entry) => format!("model: {} ({})", entry.id, entry.provider),
                Err(e) => e.to_string(),
            },
            None => {
                let current = session.manager.current_model();
                let mut out = String::new();
                for entry in session.manager.models().list() {
                    let mark = if entry.id == current.id { "*" } else { " " };
                    out.push_str(&format!(
                        "{mark} {:<40} {:<10} ${}/M in ${}/M out\n",
                        entry.id,
                        entry.provider,
                        entry.input_price_per_million,
                        entry.output_price_per_million,
                    ));
                }
                out
            }
        },
        "/agent" => match arg {
            Some(name) => match session.select_agent(name) {
                Ok(()) => format!("agent: {name}"),
                Err(e) => e.to_string(),
            },
            None => {
                let current = session.manager.current_name().unwrap_or_default();
                let mut out = String::new();
                for agent in session.manager.agents() {
                    let mark = if agent.name == current { "*" } else { " " };
                    let kind = if agent.is_remote() { " (remote)" } else { "" };
                    out.push_str(&format!("{mark} {}{kind} — {}\n", agent.name, agent.description));
                }
                out
            }
        },
        "/jump" => match arg.and_then(|a| a.parse::<usize>().ok()) {
            Some(turn) => match session.jump(turn) {
                Ok(()) => format!("rewound to turn {turn}"),
                Err(e) => e.to_string(),
            },
            None => "usage: /jump <turn> (0-based turn number)".to_string(),
        },
        "/think" => match arg.map(str::parse::<ThinkingSetting>) {
            Some(Ok(setting)) => match session.set_thinking(setting) {
                Ok(true) => format!("thinking: {setting}"),
                Ok(false) => format!(
                    "thinking {setting} is not supported by {}",
                    session.manager.current_model().id
                ),
                Err(e) => e.to_string(),
            },
            Some(Err(e)) => e,
            None => "usage: /think <budget|low|medium|high|0|none>".to_string(),
        },
        "/list" => match session.list_conversations() {
            Ok(list) if list.is_empty() => "no stored conversations".to_string(),
            Ok(list) => {
                let mut out = String::new();
                for meta in list {
                    out.push_str(&format!(
                        "{}  {}  {}\n",
                        meta.id,
                        meta.updated_at.format("%Y-%m-%d %H:%M"),
                        meta.title,
                    ));
                }
                out
            }
            Err(e) => e.to_string(),
        },
        "/load" => match arg {
            Some(id) => match session.load(id) {
                Ok(()) => format!("loaded conversation {id}"),
                Err(e) => e.to_string(),
            },
            None => "usage: /load <conversation-id>".to_string(),
        },
        "/debug" => {
            *show_thinking = !*show_thinking;
            format!(
                "debug output {}",
                if *show_thinking { "on" } else { "off" }
            )
        }
        other => format!("unknown command: {other}"),
    };
    CommandOutcome::Continue(text)
}

/// Read a file into a message part, deciding by extension.
fn attach_file(path: &Path) -> Result<Part, String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "md" | "rs" | "py" | "toml" | "json" | "yaml" | "yml" | "csv" | "log" => {
            "text/plain"
        }
        _ => return Err(format!("unsupported file type: .{ext} — try PDF or plain text")),
    };

    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);

    Ok(if mime.starts_with("image/") {
        Part::Image { mime: mime.into(), data }
    } else {
        Part::Document { mime: mime.into(), data, name }
    })
}

fn part_label(part: &Part) -> String {
    match part {
        Part::Image { mime, .. } => format!("image ({mime})"),
        Part::Document { name, .. } => format!("document {name}"),
        _ => "attachment".to_string(),
    }
}

/// OSC 52: ask the hosting terminal to place text on the system clipboard.
/// Works across SSH and needs no windowing dependency.
fn copy_to_clipboard(text: &str) {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text);
    print!("\x1b]52;c;{encoded}\x07");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn attach_rejects_unknown_extension_with_hint() {
        let err = attach_file(Path::new("/tmp/file.xlsx")).unwrap_err();
        assert!(err.contains("unsupported file type"));
        assert!(err.contains("try PDF or plain text"));
    }

    #[test]
    fn attach_maps_png_to_image_part() {
        let mut f = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        f.write_all(b"\x89PNG").unwrap();
        let part = attach_file(f.path()).unwrap();
        assert!(matches!(part, Part::Image { ref mime, .. } if mime == "image/png"));
    }

    #[test]
    fn attach_maps_markdown_to_text_document() {
        let mut f = tempfile::Builder::new().suffix(".md").tempfile().unwrap();
        f.write_all(b"# notes").unwrap();
        let part = attach_file(f.path()).unwrap();
        match part {
            Part::Document { mime, data, .. } => {
                assert_eq!(mime, "text/plain");
                let decoded = base64::engine::general_purpose::STANDARD.decode(data).unwrap();
                assert_eq!(decoded, b"# notes");
            }
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn attach_missing_file_reports_path() {
        let err = attach_file(Path::new("/nonexistent/notes.txt")).unwrap_err();
        assert!(err.contains("/nonexistent/notes.txt"));
    }
}
