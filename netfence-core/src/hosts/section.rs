//! Hosts file text model and block section edits

const BOM: char = '\u{feff}';

/// Start/end marker pair delimiting the owned section
#[derive(Debug, Clone, Copy)]
pub struct Markers<'a> {
    pub start: &'a str,
    pub end: &'a str,
}

impl Markers<'_> {
    fn is_start(&self, line: &str) -> bool {
        line.trim() == self.start.trim()
    }

    fn is_end(&self, line: &str) -> bool {
        line.trim() == self.end.trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    /// Neither marker present
    Absent,
    /// Exactly one start marker followed by exactly one end marker
    Complete,
    /// A stray marker, markers out of order, or more than one section
    Damaged,
}

/// A hosts file split into lines, remembering how to write it back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsDocument {
    lines: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
    bom: bool,
}

impl HostsDocument {
    pub fn parse(text: &str) -> Self {
        let bom = text.starts_with(BOM);
        let text = text.strip_prefix(BOM).unwrap_or(text);
        Self {
            lines: text.lines().map(str::to_string).collect(),
            line_ending: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: text.ends_with('\n'),
            bom,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.bom {
            out.push(BOM);
        }
        out.push_str(&self.lines.join(self.line_ending));
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.line_ending);
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn state(&self, markers: Markers<'_>) -> SectionState {
        let starts: Vec<usize> = self.positions(|l| markers.is_start(l));
        let ends: Vec<usize> = self.positions(|l| markers.is_end(l));
        match (starts.as_slice(), ends.as_slice()) {
            ([], []) => SectionState::Absent,
            ([start], [end]) if start < end => SectionState::Complete,
            _ => SectionState::Damaged,
        }
    }

    /// Both markers present somewhere in the file
    pub fn has_markers(&self, markers: Markers<'_>) -> bool {
        self.lines.iter().any(|l| markers.is_start(l)) && self.lines.iter().any(|l| markers.is_end(l))
    }

    fn positions(&self, pred: impl Fn(&str) -> bool) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| pred(l))
            .map(|(i, _)| i)
            .collect()
    }

    /// Host names listed strictly between the markers, skipping blanks and comments
    pub fn section_hosts(&self, markers: Markers<'_>) -> Vec<String> {
        let mut hosts = Vec::new();
        let mut inside = false;
        for line in &self.lines {
            if markers.is_start(line) {
                inside = true;
                continue;
            }
            if markers.is_end(line) {
                inside = false;
                continue;
            }
            let trimmed = line.trim();
            if !inside || trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // address first, then one or more names up to an inline comment
            hosts.extend(
                trimmed
                    .split('#')
                    .next()
                    .unwrap_or_default()
                    .split_whitespace()
                    .skip(1)
                    .map(str::to_string),
            );
        }
        hosts
    }

    /// Append a fresh section holding `entries` after the last line
    pub fn append_section(&mut self, markers: Markers<'_>, entries: &[String]) {
        self.lines.push(markers.start.to_string());
        self.lines.extend(entries.iter().cloned());
        self.lines.push(markers.end.to_string());
        self.trailing_newline = true;
    }

    /// Remove every owned section and any stray marker with its adjacent owned lines
    ///
    /// `owned` recognises entries this system writes. Lines outside the
    /// removed spans are kept as they are. Returns whether anything was removed.
    pub fn remove_sections(&mut self, markers: Markers<'_>, owned: impl Fn(&str) -> bool) -> bool {
        let lines = std::mem::take(&mut self.lines);
        let n = lines.len();
        let mut out: Vec<String> = Vec::with_capacity(n);
        let mut removed = false;
        let mut i = 0;

        while i < n {
            let line = &lines[i];

            if markers.is_start(line) {
                removed = true;
                let close = lines[i + 1..]
                    .iter()
                    .position(|l| markers.is_start(l) || markers.is_end(l))
                    .map(|offset| i + 1 + offset)
                    .filter(|&j| markers.is_end(&lines[j]));

                match close {
                    Some(end) => i = end + 1,
                    None => {
                        tracing::warn!("Hosts block section has no end marker; repairing");
                        i += 1;
                        while i < n && owned(&lines[i]) {
                            i += 1;
                        }
                    }
                }
                continue;
            }

            if markers.is_end(line) {
                tracing::warn!("Hosts block section has no start marker; repairing");
                removed = true;
                while out.last().is_some_and(|l| owned(l)) {
                    out.pop();
                }
                i += 1;
                continue;
            }

            out.push(line.clone());
            i += 1;
        }

        if removed {
            self.trailing_newline = true;
        }
        self.lines = out;
        removed
    }
}
