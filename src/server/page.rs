//! HTML pages, rendered with askama

use askama::Template;

/// The upload form, optionally with a notice or an error above it
#[derive(Template, Default)]
#[template(path = "index.html")]
pub struct IndexPage {
    pub notice: Option<String>,
    pub error: Option<String>,
}

/// The uploaded image, the model's report, and the download link
#[derive(Template)]
#[template(path = "report.html")]
pub struct ReportPage<'a> {
    pub image_uri: &'a str,
    pub report: &'a str,
    pub download_uri: &'a str,
    pub file_name: &'a str,
}
