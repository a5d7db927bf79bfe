//! Interactive session against the agent loop.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use aisbot_agent::agent_loop::AgentLoop;

pub async fn run_repl(agent: &AgentLoop) -> anyhow::Result<()> {
    println!("{}", "aisbot interactive session — Ctrl-D to exit".dimmed());
    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline(&format!("{} ", "you>".cyan().bold())) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match agent.process_direct(line).await {
                    Ok(reply) => println!("{} {}", "aisbot>".green().bold(), reply),
                    Err(e) => eprintln!("{} {e}", "error:".red()),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
