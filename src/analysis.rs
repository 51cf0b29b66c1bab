//! The analysis domain: the uploaded image, the fixed instruction sent along
//! with it, and the text that comes back

use crate::gemini::ModelError;
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// The instruction sent with every image
pub const SYSTEM_PROMPT: &str = r#"
As a highly skilled medical practitioner specializing in image analysis, you are tasked with examining medical images for a renowned hospital. Your expertise is crucial in identifying any anomalies or health issues that may be present in the images.

Your responsibilities include:

1. Detailed Analysis: thoroughly analyze each image, focusing on identifying any abnormal findings
2. Finding Reports: Document all observed anomalies or signs of disease. Clearly articulate these findings in a structured report format.
3. Recommendations and Next Steps: Based on you analysis, suggest potential next steps including further tests or treatments as applicable.
4. Treatment suggestions: If applicable, provide recommend possible treatment options or interventions based on the findings.

Important Notes:

1. Scope of response: Only respond if the image pertains to human health issues.
2. clarity and precision: In case where the image quality impedes clear analysis, note that certain aspects are 'Unable to be determined based on the provided image.'
3. Desclaimer: Accompany your analysis with the disclaimer: "Consult with a Doctor before making any decisions in long-term health issues. This analysis is not a substitute for professional medical advice or treatment."

Your insights are invaluable in guiding clinical decisions. please proceed with the analysis, adhering to the structured approach outlined above.

Please provide me an output response with these four headings with long explanation: Detailed Analysis, Finding Reports, Recommendations and Next Steps, and Treatment Suggestions.
"#;

/// File extensions the upload form accepts
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Why an upload was refused before reaching the model
#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("no image was uploaded")]
    Missing,

    #[error("image is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported file type: {0} (expected PNG or JPEG)")]
    UnsupportedType(String),
}

/// Anything that can stop an analysis from producing a report
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// An uploaded image, validated as PNG or JPEG
#[derive(Clone, PartialEq)]
pub struct UploadedImage {
    bytes: Vec<u8>,
    mime_type: &'static str,
}

impl Debug for UploadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadedImage {{ bytes: <{} bytes>, mime_type: {:?} }}",
            self.bytes.len(),
            self.mime_type
        )
    }
}

impl UploadedImage {
    /// Validate a raw upload. Returns `Ok(None)` when nothing was uploaded,
    /// which callers treat as a no-op
    pub fn from_upload(
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        file_name: Option<&str>,
        max_bytes: usize,
    ) -> Result<Option<Self>, UploadError> {
        if bytes.is_empty() {
            return Ok(None);
        }

        if let Some(name) = file_name.filter(|name| !name.is_empty()) {
            let extension = Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
                return Err(UploadError::UnsupportedType(name.to_string()));
            }
        }

        if bytes.len() > max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }

        let mime_type = match image::guess_format(&bytes) {
            Ok(ImageFormat::Png) => "image/png",
            Ok(ImageFormat::Jpeg) => "image/jpeg",
            Ok(other) => return Err(UploadError::UnsupportedType(format!("{other:?}"))),
            Err(_) => {
                return Err(UploadError::UnsupportedType(
                    declared_mime.unwrap_or("unknown").to_string(),
                ))
            }
        };

        if let Some(declared) = declared_mime {
            if normalize_mime(declared) != mime_type {
                warn!("declared type {declared} does not match content, using {mime_type}");
            }
        }

        Ok(Some(UploadedImage { bytes, mime_type }))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// The image as a base 64 `data:` URI, for inline display
    pub fn data_uri(&self) -> String {
        data_uri(self.mime_type, &self.bytes)
    }
}

fn normalize_mime(mime: &str) -> String {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

/// Encode bytes as a base 64 `data:` URI
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

/// The fixed instruction plus the image, assembled right before the call
#[derive(Debug)]
pub struct AnalysisRequest {
    pub instruction: &'static str,
    pub image: UploadedImage,
}

impl AnalysisRequest {
    pub fn new(image: UploadedImage) -> Self {
        AnalysisRequest {
            instruction: SYSTEM_PROMPT,
            image,
        }
    }
}

/// The model's free text answer
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResponse {
    pub text: String,
}

impl AnalysisResponse {
    /// The report as a downloadable plain text `data:` URI
    pub fn download_uri(&self) -> String {
        data_uri("text/plain;charset=utf-8", self.text.as_bytes())
    }
}
