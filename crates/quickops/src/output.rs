//! Terminal rendering for the CLI.

use owo_colors::OwoColorize;
use quickops_core::{AnchorRecord, ResponseSource};

use crate::lifecycle::SyncReport;
use crate::proxy::Route;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Anchors grouped by their group, children indented under parents.
pub fn render_anchors(anchors: &[AnchorRecord], format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(anchors).unwrap_or_default();
    }
    if anchors.is_empty() {
        return format!("{}\n", "No anchors".dimmed());
    }

    let mut output = String::new();
    let mut current_group: Option<&str> = None;
    for anchor in anchors {
        if current_group != Some(anchor.group.as_str()) {
            if current_group.is_some() {
                output.push('\n');
            }
            output.push_str(&format!("{} {}\n", "##".bold(), anchor.group.cyan().bold()));
            current_group = Some(anchor.group.as_str());
        }
        render_anchor(&mut output, anchor, 0);
    }
    output
}

fn render_anchor(output: &mut String, anchor: &AnchorRecord, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    let location = format!("{}:{}", anchor.file_path, anchor.line);
    output.push_str(&format!(
        "{}{} {} {}\n",
        indent,
        format!("{}.", anchor.sort).dimmed(),
        location.bold(),
        anchor.id.dimmed()
    ));
    if let Some(description) = &anchor.description {
        output.push_str(&format!("{}   {}\n", indent, description.yellow()));
    }
    if !anchor.content.is_empty() {
        output.push_str(&format!("{}   {}\n", indent, anchor.content.dimmed()));
    }
    for child in &anchor.items {
        render_anchor(output, child, depth + 1);
    }
}

pub fn render_groups(groups: &[String], format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(groups).unwrap_or_default();
    }
    groups.iter().map(|g| format!("{} {}\n", "-".blue(), g)).collect()
}

/// Which rule (if any) answers a request, and how.
pub fn render_route(method: &str, url: &str, route: &Route<'_>) -> String {
    let request = format!("{} {}", method.to_uppercase(), url);
    match route {
        Route::Mock { rule, source } => {
            let how = match source {
                ResponseSource::Static(_) => "static data".to_string(),
                ResponseSource::Template(_) => "generated from template".to_string(),
                ResponseSource::JsonFile { path, generate } => {
                    if *generate {
                        format!("generated from {}", path)
                    } else {
                        format!("data file {}", path)
                    }
                }
                ResponseSource::LocalFile { path, disposition } => {
                    format!("file {} ({})", path, disposition.as_str())
                }
                ResponseSource::Forward { target } => format!("forward to {}", target),
                ResponseSource::None => "nothing".to_string(),
            };
            format!(
                "{} {} {} rule {} ({})\n",
                "=>".green().bold(),
                request.bold(),
                "mocked by".dimmed(),
                rule.id.cyan(),
                how
            )
        }
        Route::Forward { rule, target } => {
            let target = match target {
                Some(t) => t.to_string(),
                None => "no upstream (502)".red().to_string(),
            };
            let via = rule
                .map(|r| format!(" {} {}", "via rule".dimmed(), r.id.cyan()))
                .unwrap_or_default();
            format!(
                "{} {} {} {}{}\n",
                "->".blue().bold(),
                request.bold(),
                "proxied to".dimmed(),
                target,
                via
            )
        }
    }
}

pub fn render_sync_report(report: &SyncReport) -> String {
    let mut output = String::new();
    for id in &report.started {
        output.push_str(&format!("{} started {}\n", "+".green().bold(), id));
    }
    for id in &report.stopped {
        output.push_str(&format!("{} stopped {}\n", "-".yellow().bold(), id));
    }
    for id in &report.failed {
        output.push_str(&format!("{} failed {}\n", "!".red().bold(), id));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(id: &str, group: &str, sort: u32) -> AnchorRecord {
        AnchorRecord {
            id: id.to_string(),
            file_path: "src/main.rs".to_string(),
            line: 3,
            content: "fn main() {".to_string(),
            group: group.to_string(),
            description: None,
            sort,
            items: Vec::new(),
            pid: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_render_anchors_groups_and_nests() {
        let mut parent = anchor("a1", "default", 1);
        let mut child = anchor("c1", "default", 1);
        child.pid = Some("a1".to_string());
        parent.items.push(child);
        let text = render_anchors(&[parent, anchor("t1", "TODO", 1)], OutputFormat::Text);

        assert!(text.contains("default"));
        assert!(text.contains("TODO"));
        assert!(text.contains("c1"));
        assert!(text.contains("src/main.rs:3"));
    }

    #[test]
    fn test_render_anchors_json() {
        let json = render_anchors(&[anchor("a1", "default", 1)], OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["filePath"], "src/main.rs");
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("html"), None);
    }
}
