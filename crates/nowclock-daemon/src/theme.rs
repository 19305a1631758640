//! Color palette for the terminal display.

use ratatui::style::{Color, Modifier, Style};

pub const C_PLAYING: Color = Color::Rgb(80, 200, 120);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SECONDARY: Color = Color::Rgb(115, 115, 138);
pub const C_PRIMARY: Color = Color::Rgb(210, 210, 225);
pub const C_CLOCK: Color = Color::Rgb(255, 200, 80);

pub fn style_title() -> Style {
    Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_clock() -> Style {
    Style::default().fg(C_CLOCK).add_modifier(Modifier::BOLD)
}
