//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};

fn paint(value: &impl std::fmt::Display, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle {
    /// Green bold: passed runs.
    fn success(&self) -> String;
    /// Red bold: failed runs and violations.
    fn error(&self) -> String;
    /// Yellow: ambiguous outcomes and hints worth reading.
    fn warning(&self) -> String;
    fn muted(&self) -> String;
    fn header(&self) -> String;
    /// Blue: commands, seeds and paths.
    fn code(&self) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        paint(self, Style::new().green().bold())
    }

    fn error(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }

    fn header(&self) -> String {
        paint(self, Style::new().bold())
    }

    fn code(&self) -> String {
        paint(self, Style::new().blue())
    }
}
