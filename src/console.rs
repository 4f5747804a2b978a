// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Line-oriented console front-end.
//!
//! One readline per user turn; streaming output is printed as it arrives.
//! Ctrl-C during a turn cancels it (history rolls back); Ctrl-C at the
//! prompt clears the line; Ctrl-D exits.

use std::io::Write as _;

use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crew_core::{ChatSession, CoreError, TurnOutcome, UiEvent};
use crew_model::Part;

use crate::bootstrap::Runtime;
use crate::commands::{self, CommandOutcome};

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

struct Style {
    plain: bool,
}

impl Style {
    fn dim(&self, text: &str) -> String {
        if self.plain {
            text.to_string()
        } else {
            format!("{DIM}{text}{RESET}")
        }
    }
    fn bold(&self, text: &str) -> String {
        if self.plain {
            text.to_string()
        } else {
            format!("{BOLD}{text}{RESET}")
        }
    }
}

pub async fn run(mut runtime: Runtime, plain: bool, debug_output: bool) -> anyhow::Result<()> {
    let style = Style { plain };
    let mut show_thinking = debug_output;
    let mut pending_parts: Vec<Part> = Vec::new();

    println!(
        "crew {} — model {} — {} agent(s). Type /agent, /model, or a message.",
        env!("CARGO_PKG_VERSION"),
        runtime.session.manager.current_model().id,
        runtime.session.manager.agents().len(),
    );

    let mut rl = rustyline::DefaultEditor::new()?;
    loop {
        let agent = runtime.session.manager.current_name().unwrap_or_default();
        let prompt = format!("{agent} ❯ ");
        let line = tokio::task::block_in_place(|| rl.readline(&prompt));
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) if line.trim_start().starts_with('/') => {
                let _ = rl.add_history_entry(&line);
                let CommandOutcome::Continue(result) = commands::handle(
                    &mut runtime.session,
                    &mut pending_parts,
                    &mut show_thinking,
                    &line,
                );
                println!("{}", style.dim(result.trim_end()));
            }
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                let mut parts = std::mem::take(&mut pending_parts);
                parts.push(Part::Text { text: line });
                if let Err(e) =
                    run_one_turn(&mut runtime.session, parts, &style, show_thinking).await
                {
                    println!("{}", style.bold(&format!("error: {e}")));
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(mcp) = &runtime.mcp {
        mcp.shutdown().await;
    }
    println!("bye");
    Ok(())
}

/// Drive one turn, printing deltas as they arrive.  Ctrl-C cancels the turn
/// cooperatively; the engine rolls the history back.
async fn run_one_turn(
    session: &mut ChatSession,
    parts: Vec<Part>,
    style: &Style,
    show_thinking: bool,
) -> Result<(), CoreError> {
    let (tx, rx) = mpsc::channel::<UiEvent>(1024);
    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(rx, style.plain, show_thinking));

    let outcome = {
        let turn = session.run_turn(parts, &tx, &cancel);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                result = &mut turn => break result,
                _ = tokio::signal::ctrl_c() => {
                    debug!("ctrl-c: cancelling turn");
                    cancel.cancel();
                }
            }
        }
    };
    drop(tx);
    let _ = printer.await;

    match outcome {
        Ok(TurnOutcome::Completed) => Ok(()),
        Ok(TurnOutcome::Cancelled) => {
            println!("\n{}", style.dim("turn cancelled; history unchanged"));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn print_events(mut rx: mpsc::Receiver<UiEvent>, plain: bool, show_thinking: bool) {
    let style = Style { plain };
    let mut usage: Option<(u32, u32, f64)> = None;
    let mut line_open = false;

    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::TextDelta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
                line_open = true;
            }
            UiEvent::ThinkingDelta(text) => {
                if show_thinking {
                    print!("{}", style.dim(&text));
                    let _ = std::io::stdout().flush();
                    line_open = true;
                }
            }
            UiEvent::ToolCallStarted { name, args, .. } => {
                if line_open {
                    println!();
                    line_open = false;
                }
                println!("{}", style.dim(&format!("⚙ {name} {args}")));
            }
            UiEvent::ToolCallFinished { name, output, is_error, .. } => {
                let mark = if is_error { "✗" } else { "✓" };
                let first_line = output.lines().next().unwrap_or_default();
                println!("{}", style.dim(&format!("{mark} {name}: {first_line}")));
            }
            UiEvent::AgentTransferred { to, task, .. } => {
                if line_open {
                    println!();
                    line_open = false;
                }
                println!("{}", style.bold(&format!("→ {to}: {task}")));
            }
            UiEvent::Usage { input_tokens, output_tokens, cost_usd } => {
                usage = Some((input_tokens, output_tokens, cost_usd));
            }
            UiEvent::TurnCompleted => {
                if line_open {
                    println!();
                    line_open = false;
                }
            }
            UiEvent::Notice(text) => {
                if line_open {
                    println!();
                    line_open = false;
                }
                println!("{}", style.dim(&text));
            }
        }
    }

    if let Some((input, output, cost)) = usage {
        println!(
            "{}",
            style.dim(&format!("tokens: {input} in, {output} out · ${cost:.4}"))
        );
    }
}
