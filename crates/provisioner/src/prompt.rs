//! Operator prompts.

use dialoguer::{theme::ColorfulTheme, Input, Password};

use crate::error::{ProvisionError, Result};

/// Source of operator input.
///
/// Callers apply defaults and validation themselves; a prompter only returns
/// what was typed (possibly empty).
pub trait Prompter {
    /// Ask for a line of text.
    ///
    /// # Errors
    ///
    /// Returns an error if no input can be obtained.
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Ask for a secret without echo.
    ///
    /// # Errors
    ///
    /// Returns an error if no input can be obtained.
    fn secret(&mut self, prompt: &str) -> Result<String>;

    /// Whether this prompter can reach an operator.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Terminal prompts via `dialoguer`.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    /// Create a prompter with the colorful theme.
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        input
            .interact_text()
            .map_err(|e| ProvisionError::validation(prompt, format!("prompt failed: {e}")))
    }

    fn secret(&mut self, prompt: &str) -> Result<String> {
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| ProvisionError::validation(prompt, format!("prompt failed: {e}")))
    }
}

/// Prompter for unattended runs: every question is a validation failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn input(&mut self, prompt: &str, _default: Option<&str>) -> Result<String> {
        Err(ProvisionError::validation(
            prompt,
            "value required but running non-interactively",
        ))
    }

    fn secret(&mut self, prompt: &str) -> Result<String> {
        self.input(prompt, None)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// Prompter that replays canned answers. Used by tests.
#[cfg(test)]
pub(crate) struct Scripted {
    answers: std::collections::VecDeque<String>,
    pub(crate) asked: Vec<String>,
}

#[cfg(test)]
impl Scripted {
    pub(crate) fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| (*a).to_string()).collect(),
            asked: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Prompter for Scripted {
    fn input(&mut self, prompt: &str, _default: Option<&str>) -> Result<String> {
        self.asked.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| ProvisionError::validation(prompt, "script exhausted"))
    }

    fn secret(&mut self, prompt: &str) -> Result<String> {
        self.input(prompt, None)
    }
}
