// ============================================================
// Layer 1 — Console Adapter
// ============================================================
// The in-repo ChatAdapter implementation: reads lines from
// stdin, prints replies to stdout. The `bot` and `web` modes
// drive the same serve loop through this adapter; real platform
// clients are external and implement the trait themselves.

use std::io::{self, BufRead, Write};

use anyhow::Result;

use crate::domain::traits::ChatAdapter;

pub struct ConsoleAdapter {
    /// Printed in front of every reply, e.g. "bot" or "web"
    label: String,
}

impl ConsoleAdapter {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl ChatAdapter for ConsoleAdapter {
    fn receive_message(&mut self) -> Result<Option<String>> {
        print!("you> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let bytes = io::stdin().lock().read_line(&mut line)?;

        // EOF or an explicit quit ends the conversation
        if bytes == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "/quit" {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    fn send_message(&mut self, text: &str) -> Result<()> {
        println!("{}> {}", self.label, text);
        Ok(())
    }
}
