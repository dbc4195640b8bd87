//! UI Theme Module - color palette and style helpers for the tbdeck TUI
//!
//! Palette tokens rather than hard-coded colors, plus small helpers for the
//! states a row or the status line can be in.

use ratatui::style::{Color, Modifier, Style};

/// Color palette tokens for the theme
#[derive(Clone, Debug)]
pub struct Palette {
    /// Panel border color
    pub panel_border: Color,
    /// Primary text color
    pub text: Color,
    /// Dimmed text (secondary info)
    pub text_dim: Color,
    /// Muted text (tertiary info, disabled)
    pub text_muted: Color,
    /// Accent color (highlights, focus)
    pub accent: Color,
    /// Instance has reloaded at least once
    pub success: Color,
    /// Instance is up but has not reloaded yet, or a prompt needs an answer
    pub warn: Color,
    pub error: Color,
    pub info: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub key_hint: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    /// VS Code-esque dark theme
    pub fn dark() -> Self {
        Self {
            panel_border: Color::Rgb(60, 60, 60),
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(150, 150, 150),
            text_muted: Color::Rgb(100, 100, 100),
            accent: Color::Rgb(79, 193, 255),
            success: Color::Rgb(78, 201, 176),
            warn: Color::Rgb(220, 180, 100),
            error: Color::Rgb(244, 135, 113),
            info: Color::Rgb(156, 220, 254),
            selection_bg: Color::Rgb(38, 79, 120),
            selection_fg: Color::White,
            key_hint: Color::Rgb(206, 145, 120),
        }
    }
}

/// How a message on the status line should read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    /// Style for an instance row given its last reload time
    pub fn reload_style(&self, reload_time: Option<f64>) -> Style {
        let color = match reload_time {
            Some(_) => self.palette.success,
            None => self.palette.warn,
        };
        Style::default().fg(color)
    }

    pub fn reload_icon(&self, reload_time: Option<f64>) -> &'static str {
        match reload_time {
            Some(_) => "●",
            None => "◐",
        }
    }

    pub fn tone_style(&self, tone: Tone) -> Style {
        let color = match tone {
            Tone::Info => self.palette.info,
            Tone::Success => self.palette.success,
            Tone::Warn => self.palette.warn,
            Tone::Error => self.palette.error,
        };
        Style::default().fg(color)
    }

    pub fn key_hint_style(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn border_style(&self, focused: bool) -> Style {
        if focused {
            Style::default().fg(self.palette.accent)
        } else {
            Style::default().fg(self.palette.panel_border)
        }
    }

    pub fn selection_style(&self) -> Style {
        Style::default()
            .bg(self.palette.selection_bg)
            .fg(self.palette.selection_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text_style(&self) -> Style {
        Style::default().fg(self.palette.text)
    }

    pub fn text_dim_style(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    pub fn text_muted_style(&self) -> Style {
        Style::default().fg(self.palette.text_muted)
    }

    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.palette.accent)
            .add_modifier(Modifier::BOLD)
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

/// Convenience accessors on the default theme
pub mod styles {
    use super::*;

    pub fn reload(reload_time: Option<f64>) -> Style {
        theme().reload_style(reload_time)
    }

    pub fn reload_icon(reload_time: Option<f64>) -> &'static str {
        theme().reload_icon(reload_time)
    }

    pub fn tone(tone: Tone) -> Style {
        theme().tone_style(tone)
    }

    pub fn key_hint() -> Style {
        theme().key_hint_style()
    }

    pub fn border(focused: bool) -> Style {
        theme().border_style(focused)
    }

    pub fn selection() -> Style {
        theme().selection_style()
    }

    pub fn text() -> Style {
        theme().text_style()
    }

    pub fn text_dim() -> Style {
        theme().text_dim_style()
    }

    pub fn text_muted() -> Style {
        theme().text_muted_style()
    }

    pub fn title() -> Style {
        theme().title_style()
    }
}
