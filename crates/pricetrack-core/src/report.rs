use crate::record::{sanitize_site, ProductRecord};
use anyhow::Context;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Files produced by one `Reporter::write` call.
#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub report: PathBuf,
    pub screenshots: Vec<PathBuf>,
}

/// Writes the plain-text price report and per-site screenshots.
pub struct Reporter {
    output_dir: PathBuf,
}

impl Reporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(
        &self,
        product: &str,
        records: &[ProductRecord],
        generated: DateTime<Local>,
    ) -> anyhow::Result<ReportFiles> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output directory {}", self.output_dir.display())
        })?;

        let stamp = generated.format("%Y%m%d_%H%M%S").to_string();
        let mut body = String::new();
        let mut screenshots = Vec::new();

        writeln!(body, "Price Report for: {}", product)?;
        writeln!(body, "Generated: {}", generated.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(body)?;

        for record in records {
            let screenshot = match &record.screenshot {
                Some(bytes) => {
                    let path = self
                        .output_dir
                        .join(format!("screenshot_{}_{}.png", stamp, sanitize_site(&record.site)));
                    std::fs::write(&path, bytes).with_context(|| {
                        format!("failed to save screenshot {}", path.display())
                    })?;
                    screenshots.push(path.clone());
                    Some(path)
                }
                None => None,
            };
            body.push_str(&render_record(record, screenshot.as_deref()));
        }

        let report = self.output_dir.join(format!("report_{}.txt", stamp));
        std::fs::write(&report, body)
            .with_context(|| format!("failed to write report {}", report.display()))?;
        tracing::info!("Report generated: {}", report.display());

        Ok(ReportFiles {
            report,
            screenshots,
        })
    }
}

fn render_record(record: &ProductRecord, screenshot: Option<&Path>) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nSite: {}\n", record.site));
    out.push_str(&format!("Price: ${:.2}\n", record.price));
    out.push_str(&format!("Availability: {}\n", record.availability));
    // `{:?}` keeps the decimal on whole ratings (4.0, not 4).
    if let Some(rating) = record.rating.filter(|r| *r > 0.0) {
        out.push_str(&format!("Seller Rating: {:?}/5.0\n", rating));
    }
    if let Some(path) = screenshot {
        out.push_str(&format!("Screenshot saved: {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(site: &str, rating: Option<f64>, screenshot: Option<Vec<u8>>) -> ProductRecord {
        ProductRecord {
            site: site.to_string(),
            product: "iPhone 16 Pro".to_string(),
            price: 54999.0,
            availability: "In stock".to_string(),
            rating,
            screenshot,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_render_record_without_optionals() {
        let text = render_record(&record("noon.com", None, None), None);
        assert_eq!(
            text,
            "\nSite: noon.com\nPrice: $54999.00\nAvailability: In stock\n"
        );
    }

    #[test]
    fn test_render_whole_rating_keeps_decimal() {
        let text = render_record(&record("noon.com", Some(4.0), None), None);
        assert!(text.contains("Seller Rating: 4.0/5.0\n"));
    }

    #[test]
    fn test_render_zero_rating_is_omitted() {
        let text = render_record(&record("noon.com", Some(0.0), None), None);
        assert!(!text.contains("Seller Rating"));
    }

    #[test]
    fn test_write_report_and_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(dir.path().join("reports"));
        let generated = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let files = reporter
            .write(
                "iPhone 16 Pro",
                &[
                    record("noon.com", Some(4.2), Some(vec![1, 2, 3])),
                    record("amazon.com", None, None),
                ],
                generated,
            )
            .unwrap();

        assert_eq!(
            files.report.file_name().unwrap(),
            "report_20250102_030405.txt"
        );
        assert_eq!(files.screenshots.len(), 1);
        assert_eq!(
            files.screenshots[0].file_name().unwrap(),
            "screenshot_20250102_030405_noon_com.png"
        );
        assert_eq!(std::fs::read(&files.screenshots[0]).unwrap(), vec![1, 2, 3]);

        let text = std::fs::read_to_string(&files.report).unwrap();
        assert!(text.starts_with(
            "Price Report for: iPhone 16 Pro\nGenerated: 2025-01-02 03:04:05\n"
        ));
        assert!(text.contains("Seller Rating: 4.2/5.0\n"));
        assert!(text.contains("Site: amazon.com\nPrice: $54999.00\nAvailability: In stock\n"));
        assert!(text.contains(&format!(
            "Screenshot saved: {}\n",
            files.screenshots[0].display()
        )));
    }
}
