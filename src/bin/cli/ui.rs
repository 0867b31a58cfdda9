use clap::ValueEnum;
use nu_ansi_term::{Color, Style};
use std::fmt::Display;
use std::io::IsTerminal;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

pub struct Ui {
    palette: Palette,
    paint: bool,
}

impl Ui {
    pub fn new(theme: Theme) -> Self {
        let stdout_is_tty = std::io::stdout().is_terminal();
        let paint = match theme {
            Theme::Plain => false,
            Theme::Auto | Theme::Light | Theme::Dark => stdout_is_tty,
        };

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        let palette = match theme {
            Theme::Plain => Palette::plain(),
            Theme::Light => Palette::light(),
            Theme::Dark | Theme::Auto => Palette::dark(),
        };
        Self { palette, paint }
    }

    pub fn heading(&self, title: &str) {
        let formatted = format!("{HEADING_ICON} {title}");
        if self.paint {
            println!("{}", self.palette.heading.paint(formatted));
        } else {
            println!("{formatted}");
        }
    }

    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(String, String)> = rows
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            if self.paint {
                println!(
                    "  {} {}",
                    self.palette.key.paint(format!("{key:>key_width$}:")),
                    self.palette.value.paint(value)
                );
            } else {
                println!("  {key:>key_width$}: {value}");
            }
        }
    }

    /// Prints an explain report, coloring each line by its indicator.
    pub fn explain_report(&self, report: &str) {
        for line in report.lines() {
            if !self.paint {
                println!("{line}");
                continue;
            }
            let style = match line.trim_start().chars().next() {
                Some('*') => self.palette.on_gpu,
                Some('!') => self.palette.off_gpu,
                Some('@') => self.palette.blocked,
                Some('#') => self.palette.no_op,
                _ => self.palette.value,
            };
            println!("{}", style.paint(line));
        }
    }

    /// Prints a rendered plan tree, highlighting GPU nodes and transitions.
    pub fn plan_tree(&self, tree: &str) {
        for line in tree.lines() {
            if !self.paint {
                println!("{line}");
                continue;
            }
            let label = line.trim_start();
            let style = if label.starts_with("Gpu") {
                self.palette.on_gpu
            } else if label.starts_with("RowToColumnar") || label.starts_with("ColumnarToRow") {
                self.palette.transition
            } else {
                self.palette.value
            };
            println!("{}", style.paint(line));
        }
    }

    pub fn info(&self, message: &str) {
        let prefix = if self.paint {
            self.palette.info.paint(INFO_ICON)
        } else {
            Style::new().paint(INFO_ICON)
        };
        println!("{prefix} {message}");
    }

    pub fn error(&self, message: &str) {
        if self.paint {
            eprintln!("{} {message}", self.palette.off_gpu.paint("error:"));
        } else {
            eprintln!("error: {message}");
        }
    }
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    info: Style,
    on_gpu: Style,
    off_gpu: Style,
    blocked: Style,
    no_op: Style,
    transition: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            info: Style::new().fg(Color::LightCyan),
            on_gpu: Style::new().fg(Color::LightGreen),
            off_gpu: Style::new().fg(Color::LightRed).bold(),
            blocked: Style::new().fg(Color::Yellow),
            no_op: Style::new().fg(Color::DarkGray),
            transition: Style::new().fg(Color::LightCyan).italic(),
        }
    }

    fn light() -> Self {
        Self {
            heading: Style::new().fg(Color::Blue).bold(),
            key: Style::new().fg(Color::Black).bold(),
            value: Style::new().fg(Color::Black),
            info: Style::new().fg(Color::Purple),
            on_gpu: Style::new().fg(Color::Green),
            off_gpu: Style::new().fg(Color::Red).bold(),
            blocked: Style::new().fg(Color::Yellow),
            no_op: Style::new().fg(Color::DarkGray),
            transition: Style::new().fg(Color::Blue).italic(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            value: Style::new(),
            info: Style::new(),
            on_gpu: Style::new(),
            off_gpu: Style::new(),
            blocked: Style::new(),
            no_op: Style::new(),
            transition: Style::new(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const INFO_ICON: &str = "ℹ";
