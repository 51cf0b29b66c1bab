use crate::analysis::{UploadError, UploadedImage};
use actix_multipart::form::{bytes::Bytes, MultipartForm};
use serde::Serialize;

/// The submitted form. Browsers send an empty `image` part when no file was
/// chosen
#[derive(MultipartForm)]
pub struct UploadForm {
    pub image: Option<Bytes>,
}

impl UploadForm {
    /// Validate the upload, `None` if nothing was chosen
    pub fn into_image(self, max_bytes: usize) -> Result<Option<UploadedImage>, UploadError> {
        let Some(file) = self.image else {
            return Ok(None);
        };

        let declared = file.content_type.as_ref().map(|mime| mime.essence_str());
        UploadedImage::from_upload(
            file.data.to_vec(),
            declared,
            file.file_name.as_deref(),
            max_bytes,
        )
    }
}

/// JSON body of a successful `/api/analyze`
#[derive(Debug, Serialize)]
pub struct AnalysisJson {
    pub mime_type: &'static str,
    pub report: String,
    pub file_name: &'static str,
}
