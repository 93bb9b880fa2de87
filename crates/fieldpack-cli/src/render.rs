use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};

fn label_style(label: &str) -> Style {
    match label {
        "ok" | "built" => Style::new()
            .fg_color(Some(AnsiColor::Green.into()))
            .effects(Effects::BOLD),
        "stale" => Style::new()
            .fg_color(Some(AnsiColor::Yellow.into()))
            .effects(Effects::BOLD),
        _ => Style::new().effects(Effects::BOLD),
    }
}

fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

pub fn render_status_line(label: &str, message: &str, colored: bool) -> String {
    if colored {
        let style = label_style(label);
        format!("{style}{label:>7}{style:#} {message}")
    } else {
        format!("{label:>7} {message}")
    }
}

pub fn status(label: &str, message: &str) {
    println!("{}", render_status_line(label, message, is_interactive()));
}

/// Steady-tick spinner for long builds; hidden when stdout is not a tty.
pub fn spinner(label: &str) -> ProgressBar {
    if !is_interactive() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner().with_message(label.to_string());
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}")
    {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
