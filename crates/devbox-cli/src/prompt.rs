//! Terminal prompts

use devbox_core::{CoreError, Prompter, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};

fn prompt_error(e: dialoguer::Error) -> CoreError {
    CoreError::Prompt(e.to_string())
}

/// Prompts on the controlling terminal
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
}

impl DialoguerPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for DialoguerPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for DialoguerPrompter {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(message)
            .default(default)
            .interact()
            .map_err(prompt_error)
    }

    fn select(&self, message: &str, items: &[String], default: usize) -> Result<usize> {
        Select::with_theme(&self.theme)
            .with_prompt(message)
            .items(items)
            .default(default)
            .interact()
            .map_err(prompt_error)
    }

    fn input(&self, message: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::with_theme(&self.theme)
            .with_prompt(message)
            .allow_empty(true);
        if let Some(default) = default.filter(|d| !d.is_empty()) {
            input = input.default(default.to_string());
        }
        input.interact_text().map_err(prompt_error)
    }

    fn password(&self, message: &str, allow_empty: bool) -> Result<String> {
        Password::with_theme(&self.theme)
            .with_prompt(message)
            .allow_empty_password(allow_empty)
            .interact()
            .map_err(prompt_error)
    }
}

/// Used when stdin is not a terminal: every question takes its default
///
/// Questions without a default fail instead of blocking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        tracing::info!("{} [{}] (non-interactive)", message, if default { "yes" } else { "no" });
        Ok(default)
    }

    fn select(&self, _message: &str, _items: &[String], default: usize) -> Result<usize> {
        Ok(default)
    }

    fn input(&self, message: &str, default: Option<&str>) -> Result<String> {
        default
            .map(str::to_string)
            .ok_or_else(|| CoreError::Prompt(format!("'{}' needs an answer but stdin is not a terminal", message)))
    }

    fn password(&self, message: &str, allow_empty: bool) -> Result<String> {
        if allow_empty {
            Ok(String::new())
        } else {
            Err(CoreError::Prompt(format!(
                "'{}' needs an answer but stdin is not a terminal",
                message
            )))
        }
    }
}

/// Terminal prompts when stdin is a TTY, defaults otherwise
pub fn for_terminal() -> Box<dyn Prompter> {
    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        Box::new(DialoguerPrompter::new())
    } else {
        Box::new(NonInteractivePrompter)
    }
}
