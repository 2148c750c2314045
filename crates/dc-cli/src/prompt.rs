//! Numbered-list prompts on the terminal

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use dc_core::error::PromptError;
use dc_core::traits::Prompter;

/// Prompts on stderr and reads the answer from stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn choose(
        &self,
        title: &str,
        choices: &[String],
        default: Option<usize>,
    ) -> Result<usize, PromptError> {
        if choices.is_empty() {
            return Err(PromptError::NoChoices);
        }

        let title = title.to_string();
        let choices = choices.to_vec();
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            choose_from(&mut input, &mut io::stderr(), &title, &choices, default)
        })
        .await
        .map_err(|e| PromptError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

/// Print the list and read until a valid answer or end of input
///
/// An empty answer picks `default` when there is one.
pub fn choose_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    title: &str,
    choices: &[String],
    default: Option<usize>,
) -> Result<usize, PromptError> {
    if choices.is_empty() {
        return Err(PromptError::NoChoices);
    }
    let default = default.filter(|d| *d < choices.len());

    writeln!(output, "{}", title)?;
    for (i, choice) in choices.iter().enumerate() {
        writeln!(output, "  {}) {}", i + 1, choice)?;
    }

    loop {
        match default {
            Some(d) => write!(output, "Choice [{}]: ", d + 1)?,
            None => write!(output, "Choice: ")?,
        }
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }

        let answer = line.trim();
        if answer.is_empty() {
            if let Some(d) = default {
                return Ok(d);
            }
            continue;
        }

        match answer.parse::<usize>() {
            Ok(n) if (1..=choices.len()).contains(&n) => return Ok(n - 1),
            _ => writeln!(output, "Enter a number between 1 and {}", choices.len())?,
        }
    }
}
