//! Interactive display

use async_trait::async_trait;
use colored::Colorize;
use std::io::{self, Write};

use crate::error::RunnerError;

#[async_trait]
pub trait InteractiveView: Send + Sync {
    fn is_active(&self) -> bool;

    fn show_markdown(&self, title: &str, markdown: &str) -> Result<(), RunnerError>;

    /// Ask a yes/no question.
    async fn confirm(&self, question: &str) -> Result<bool, RunnerError>;
}

/// Prints to stdout and reads answers from stdin.
#[derive(Debug, Clone)]
pub struct TerminalView {
    active: bool,
}

impl TerminalView {
    pub fn new(active: bool) -> Self {
        Self { active }
    }
}

#[async_trait]
impl InteractiveView for TerminalView {
    fn is_active(&self) -> bool {
        self.active
    }

    fn show_markdown(&self, title: &str, markdown: &str) -> Result<(), RunnerError> {
        println!("\n{} {}\n", "▸".blue(), title.bold());
        println!("{}", markdown);
        Ok(())
    }

    async fn confirm(&self, question: &str) -> Result<bool, RunnerError> {
        print!("{} {} (y/n) ", "?".yellow(), question);
        io::stdout().flush()?;

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| RunnerError::Execution(format!("failed to read answer: {}", e)))??;

        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}
