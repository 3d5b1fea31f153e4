use super::{Diagnostic, Severity};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_yellow(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;33m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let severity_label = match d.severity {
            Severity::Error => self.bold_red("error"),
            Severity::Warning => self.bold_yellow("warning"),
        };
        out.push_str(&format!("{}: {}\n", severity_label, self.bold(&d.message)));

        if let Some(loc) = &d.location {
            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), loc.function, loc.pc));
        }

        if !d.listing.is_empty() {
            let gutter = d.listing.iter().map(|l| format!("{:04}", l.pc).len()).max().unwrap_or(4);
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);
            out.push_str(&format!("{pad} {pipe}\n"));
            for line in &d.listing {
                let pc = self.cyan(&format!("{:0>gutter$}", line.pc));
                out.push_str(&format!("{pc} {pipe} {}\n", line.text));
                if line.is_primary {
                    // underline the mnemonic only
                    let width = line.text.split_whitespace().next().map_or(1, str::len);
                    out.push_str(&format!("{pad} {pipe} {}\n", self.bold_red(&"^".repeat(width))));
                }
            }
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
