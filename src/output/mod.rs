//! Console output for the command line: status lines, summaries and the image table

use crate::sync::ImageInfo;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("INFO", message, "ℹ️");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("SUCCESS", message, "✅");
        }
    }

    pub fn warning(&self, message: &str) {
        eprintln!("⚠️  {}", message);
    }

    /// Errors always reach stderr verbatim, quiet or not.
    pub fn error(&self, message: &str) {
        eprintln!("{}", message);
    }

    pub fn section(&self, title: &str) {
        if self.quiet {
            return;
        }
        if self.verbose {
            let separator = "━".repeat(60);
            println!("\n{}", separator);
            println!("📋 {}", title);
            println!("{}", separator);
        } else {
            println!("\n📋 {}", title);
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose {
            println!("      📝 {}", detail);
        }
    }

    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }
        println!("\n📊 {}", title);
        for (key, value) in items {
            println!("  • {}: {}", key, value);
        }
    }

    /// Prints the image table. Printed even in quiet mode since it is the command's result.
    pub fn images(&self, images: &[ImageInfo]) {
        print!("{}", image_table(images));
    }

    fn print_with_timestamp(&self, level: &str, message: &str, emoji: &str) {
        if self.verbose {
            let timestamp = format!("[{:8.3}s]", self.start_time.elapsed().as_secs_f64());
            println!("{} {} {} {}", timestamp, emoji, level, message);
        } else {
            println!("{} {}", emoji, message);
        }
    }

    pub fn format_size(&self, size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Renders `REPOSITORY TAG IMAGE ID CREATED` rows with columns padded to fit.
pub fn image_table(images: &[ImageInfo]) -> String {
    let headers = ["REPOSITORY", "TAG", "IMAGE ID", "CREATED"];
    let rows: Vec<[String; 4]> = images
        .iter()
        .map(|image| {
            [
                image.repository.clone(),
                image.tag.clone(),
                image.id.short().to_string(),
                image.last_modified.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: [&str; 4]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("   ");
        out.push_str(line.trim_end());
        out.push('\n');
    };
    push_row(headers);
    for row in &rows {
        push_row([&row[0], &row[1], &row[2], &row[3]]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageId;
    use chrono::{TimeZone, Utc};

    #[test]
    fn sizes_and_durations() {
        let out = OutputManager::new_quiet();
        assert_eq!(out.format_size(512), "512 B");
        assert_eq!(out.format_size(1536), "1.5 KB");
        assert_eq!(out.format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(out.format_duration(Duration::from_secs(75)), "1m15s");
        assert_eq!(out.format_duration(Duration::from_secs(3725)), "1h02m05s");
    }

    #[test]
    fn table_columns_line_up() {
        let images = vec![
            ImageInfo {
                repository: "alpine".to_string(),
                tag: "3.19".to_string(),
                id: ImageId::new("0123456789abcdef0123"),
                last_modified: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            },
            ImageInfo {
                repository: "team/service-with-long-name".to_string(),
                tag: "latest".to_string(),
                id: ImageId::new("fedcba9876543210"),
                last_modified: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            },
        ];
        let table = image_table(&images);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("REPOSITORY"));
        assert!(lines[1].contains("0123456789ab"));
        assert!(!lines[1].contains("0123456789abc"));
        assert!(lines[1].ends_with("2024-01-02 03:04:05 UTC"));

        let tag_column = lines[0].find("TAG").unwrap();
        assert_eq!(lines[1].find("3.19"), Some(tag_column));
        assert_eq!(lines[2].find("latest"), Some(tag_column));
    }

    #[test]
    fn empty_table_has_only_headers() {
        assert_eq!(image_table(&[]), "REPOSITORY   TAG   IMAGE ID   CREATED\n");
    }
}
