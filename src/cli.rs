use crate::error::Result;
use crate::manager::AgentManager;
use std::io::{BufRead, Write};
use tracing::{debug, error};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

fn print_banner<W: Write>(out: &mut W) -> Result<()> {
    let rule = "=".repeat(60);
    writeln!(out, "{rule}")?;
    writeln!(out, "SQL Server Agent Interactive CLI")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "\nType 'exit' to quit\n")?;
    Ok(())
}

/// Interactive loop: one question per line until an exit word or end of input.
///
/// A failed run is reported and the loop keeps going.
pub async fn run_repl<R: BufRead, W: Write>(
    manager: &AgentManager,
    session_id: &str,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    print_banner(out)?;

    let mut line = String::new();
    loop {
        write!(out, "You: ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            debug!("end of input");
            writeln!(out)?;
            break;
        }

        let query = line.trim();
        if EXIT_WORDS.iter().any(|w| query.eq_ignore_ascii_case(w)) {
            writeln!(out, "\nGoodbye!")?;
            break;
        }
        if query.is_empty() {
            continue;
        }

        writeln!(out, "\nAgent:")?;
        if let Err(e) = manager.print_response(query, session_id, out).await {
            error!(error = %e, "query failed");
            writeln!(out, "Error: {e}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
