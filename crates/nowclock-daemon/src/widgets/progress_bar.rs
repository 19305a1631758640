//! Smooth Unicode progress bar with an elapsed / length label underneath.

use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::Style,
    text::Line,
    widgets::Paragraph,
    Frame,
};

use crate::theme::{C_MUTED, C_PLAYING, C_SECONDARY};

const BLOCKS: [char; 9] = [' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉', '█'];

/// Render the bar on the first row of `area` and the time label on the
/// second.  `length` is `None` until track metadata has been applied.
pub fn draw_progress(frame: &mut Frame, area: Rect, elapsed: f64, length: Option<f64>) {
    if area.width < 4 || area.height == 0 {
        return;
    }

    let [bar_area, label_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).areas(area);

    let ratio = match length {
        Some(len) if len > 0.0 => elapsed / len,
        _ => 0.0,
    };
    let bar = bar_text(ratio, bar_area.width as usize);
    frame.render_widget(
        Paragraph::new(Line::styled(bar, Style::default().fg(C_PLAYING)))
            .style(Style::default().bg(C_MUTED)),
        bar_area,
    );

    if label_area.height > 0 {
        frame.render_widget(
            Paragraph::new(progress_label(elapsed, length))
                .style(Style::default().fg(C_SECONDARY))
                .alignment(Alignment::Center),
            label_area,
        );
    }
}

/// `width` cells filled to `ratio` in eighths of a cell.
fn bar_text(ratio: f64, width: usize) -> String {
    let eighths = (ratio.clamp(0.0, 1.0) * width as f64 * 8.0) as usize;
    let full_blocks = eighths / 8;
    let partial = eighths % 8;

    let mut bar = String::with_capacity(width * 3);
    for _ in 0..full_blocks {
        bar.push('█');
    }
    if full_blocks < width {
        bar.push(BLOCKS[partial]);
        for _ in (full_blocks + 1)..width {
            bar.push(' ');
        }
    }
    bar
}

/// "MM:SS / MM:SS", or "- / -" before the length is known.
pub fn progress_label(elapsed: f64, length: Option<f64>) -> String {
    match length {
        Some(len) => format!("{} / {}", fmt_time(elapsed), fmt_time(len)),
        None => "- / -".to_string(),
    }
}

fn fmt_time(secs: f64) -> String {
    let s = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!("{:02}:{:02}", s / 60, s % 60)
}
