//! Terminal rendering for pipeline events.
//!
//! Materials are shown dimmed, the answer in plain text, and notices and
//! errors on their own lines. With `json` set every event is written as one
//! NDJSON line instead.

use std::io::{self, Write};

use colored::Colorize;
use compass_orchestrator::{Segment, StageLabel, StreamEvent, Transcript};

/// Renders events to a writer while keeping a [`Transcript`] of them.
pub struct EventRenderer<W: Write> {
    out: W,
    json: bool,
    transcript: Transcript,
    mid_line: bool,
}

impl EventRenderer<io::Stdout> {
    /// Renderer writing to stdout
    pub fn stdout(json: bool) -> Self {
        Self::new(io::stdout(), json)
    }
}

impl<W: Write> EventRenderer<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json, transcript: Transcript::default(), mid_line: false }
    }

    /// Writes one event.
    pub fn render(&mut self, event: &StreamEvent) -> io::Result<()> {
        self.transcript.push(event);
        if self.json {
            self.out.write_all(event.to_ndjson_line().as_bytes())?;
            return self.out.flush();
        }

        match event {
            StreamEvent::Stage { label } => {
                self.break_line()?;
                writeln!(self.out, "{}", stage_banner(*label))?;
            }
            StreamEvent::Token { segment: Segment::Materials, text } => {
                write!(self.out, "{}", text.dimmed())?;
                self.mid_line = !text.ends_with('\n');
            }
            StreamEvent::Token { segment: Segment::Answer, text } => {
                write!(self.out, "{}", text)?;
                self.mid_line = !text.ends_with('\n');
            }
            StreamEvent::Info { message } => {
                self.break_line()?;
                writeln!(self.out, "{} {}", "ℹ".cyan(), message.yellow())?;
            }
            StreamEvent::Error { stage, message } => {
                self.break_line()?;
                let marker = if stage.is_terminal() { "✗".red().bold() } else { "!".yellow().bold() };
                writeln!(self.out, "{} {} {}", marker, format!("[{}]", stage.as_str()).dimmed(), message.red())?;
            }
        }
        self.out.flush()
    }

    /// Ends the output cleanly and hands back what was rendered.
    pub fn finish(mut self) -> io::Result<Transcript> {
        if !self.json {
            self.break_line()?;
        }
        self.out.flush()?;
        Ok(self.transcript)
    }

    fn break_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

fn stage_banner(label: StageLabel) -> colored::ColoredString {
    let text = match label {
        StageLabel::Routing => "▸ Planning lookups",
        StageLabel::Tools => "▸ Consulting requirements",
        StageLabel::Answer => "▸ Answer",
    };
    text.cyan().bold()
}
