//! User interaction capability
//!
//! Orchestration code decides what to ask; a [`Prompter`] decides how. The
//! CLI plugs in terminal prompts, tests plug in scripted answers.

use crate::Result;

pub trait Prompter: Send + Sync {
    /// Yes/no question
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;

    /// Pick one of `items`, returning its index
    fn select(&self, message: &str, items: &[String], default: usize) -> Result<usize>;

    /// Free-form text; `default` is used for an empty answer
    fn input(&self, message: &str, default: Option<&str>) -> Result<String>;

    /// Masked input
    fn password(&self, message: &str, allow_empty: bool) -> Result<String>;
}
