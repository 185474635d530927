use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{error, info};
use url::Url;

use rayabaari_types::{Attachment, AttachmentKind, Backend};

use crate::error::{ChatError, ChatResult};

/// A file picked for sending.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_mime(&self.mime)
    }
}

/// Store the file in its kind's bucket under a fresh name and return the
/// attachment to reference from a message.
pub async fn upload(backend: &dyn Backend, upload: Upload) -> ChatResult<Attachment> {
    let kind = upload.kind();
    let bucket = kind.bucket();
    let name = storage_name(&upload.file_name);

    info!("Uploading {} as {}/{}", upload.file_name, bucket, name);
    backend
        .upload_blob(bucket, &name, &upload.mime, upload.bytes)
        .await
        .map_err(|e| {
            error!("Upload of {} failed: {}", upload.file_name, e);
            ChatError::Upload(e)
        })?;

    Ok(Attachment {
        url: backend.public_url(bucket, &name),
        kind,
    })
}

/// `<unix millis>_<7 random chars>.<original extension>`
pub fn storage_name(file_name: &str) -> String {
    let tag: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(7)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let stamp = Utc::now().timestamp_millis();

    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains(['/', '\\']) => {
            format!("{}_{}.{}", stamp, tag, ext.to_ascii_lowercase())
        }
        _ => format!("{}_{}", stamp, tag),
    }
}

/// Bucket and file name of a public blob URL: its last two path segments.
pub fn locate(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., bucket, file] => Some((bucket.to_string(), file.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_names_keep_extension() {
        let name = storage_name("Holiday.Photo.JPG");
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");

        let (millis, tag) = stem.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(tag.len(), 7);
        assert!(tag.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        assert!(!storage_name("README").contains('.'));
        assert_ne!(storage_name("a.png"), storage_name("a.png"));
    }

    #[test]
    fn locate_takes_last_two_segments() {
        assert_eq!(
            locate("http://localhost:3000/storage/v1/object/public/chat_pdfs/1_abc.pdf"),
            Some(("chat_pdfs".to_string(), "1_abc.pdf".to_string()))
        );
        assert_eq!(locate("http://host/only"), None);
        assert_eq!(locate("not a url"), None);
    }

    #[test]
    fn kind_follows_mime() {
        assert_eq!(Upload::new("a", "image/png", vec![1]).kind(), AttachmentKind::Image);
        assert_eq!(Upload::new("a", "application/pdf", vec![1]).kind(), AttachmentKind::Pdf);
        assert_eq!(Upload::new("a", "text/plain", vec![1]).kind(), AttachmentKind::Generic);
    }
}
