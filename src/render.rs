//! Plain-text terminal rendering of the agent's markdown answers.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Render markdown for a terminal: emphasis markers dropped, headings
/// underlined, bullets and code blocks indented, tables aligned in columns.
pub fn render_markdown(text: &str) -> String {
    let mut out = String::new();
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut heading_start: Option<usize> = None;
    let mut in_code = false;
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<String> = None;

    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    for event in Parser::new_ext(text, options) {
        match event {
            Event::Start(Tag::Heading { .. }) => heading_start = Some(out.len()),
            Event::End(TagEnd::Heading(level)) => {
                if let Some(start) = heading_start.take() {
                    let width = out[start..].chars().count();
                    let mark = if level == HeadingLevel::H1 { "=" } else { "-" };
                    out.push('\n');
                    out.push_str(&mark.repeat(width));
                }
                out.push_str("\n\n");
            }
            Event::End(TagEnd::Paragraph) => {
                out.push_str(if lists.is_empty() { "\n\n" } else { "\n" });
            }

            Event::Start(Tag::List(start)) => {
                if !lists.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                lists.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(lists.len().saturating_sub(1)));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{n}. "));
                        *n += 1;
                    }
                    _ => out.push_str("• "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }

            Event::Start(Tag::CodeBlock(_)) => in_code = true,
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                out.push('\n');
            }

            Event::Start(Tag::TableCell) => cell = Some(String::new()),
            Event::End(TagEnd::TableCell) => {
                row.push(cell.take().unwrap_or_default().trim().to_string());
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                table.push(std::mem::take(&mut row));
            }
            Event::End(TagEnd::Table) => {
                out.push_str(&format_table(&std::mem::take(&mut table)));
                out.push('\n');
            }

            Event::Text(t) | Event::Code(t) => match cell.as_mut() {
                Some(cell) => cell.push_str(&t),
                None if in_code => {
                    for line in t.lines() {
                        out.push_str("    ");
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                None => out.push_str(&t),
            },
            Event::SoftBreak | Event::HardBreak => match cell.as_mut() {
                Some(cell) => cell.push(' '),
                None => out.push('\n'),
            },
            Event::Rule => {
                out.push_str(&"─".repeat(40));
                out.push_str("\n\n");
            }
            _ => {}
        }
    }

    out.trim_end().to_string()
}

/// Pad columns to a common width; a rule separates the header row.
fn format_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for (r, row) in rows.iter().enumerate() {
        let line: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                format!("{cell:<w$}")
            })
            .collect();
        out.push_str(line.join(" | ").trim_end());
        out.push('\n');

        if r == 0 {
            let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
            out.push_str(&rule.join("-+-"));
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_emphasis() {
        assert_eq!(
            render_markdown("# Orders\n\nThere are **42** orders."),
            "Orders\n======\n\nThere are 42 orders."
        );
        assert_eq!(render_markdown("## Top"), "Top\n---");
    }

    #[test]
    fn lists_get_bullets_and_numbers() {
        assert_eq!(render_markdown("- a\n- b"), "• a\n• b");
        assert_eq!(render_markdown("1. x\n2. y"), "1. x\n2. y");
    }

    #[test]
    fn code_is_indented_and_inline_code_unwrapped() {
        assert_eq!(render_markdown("```sql\nSELECT 1\n```"), "    SELECT 1");
        assert_eq!(render_markdown("Run `SELECT 1` now"), "Run SELECT 1 now");
    }

    #[test]
    fn tables_are_aligned() {
        let md = "| id | name |\n| --- | --- |\n| 1 | Ada |\n| 22 | Bo |";
        assert_eq!(render_markdown(md), "id | name\n---+-----\n1  | Ada\n22 | Bo");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(render_markdown("token-1:hello"), "token-1:hello");
    }
}
