use lopdf::ObjectId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The image selector was given neither or both of index and name.
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),
    /// The 1-based page number is past the end of the document.
    #[error("page {0} not found in document")]
    PageNotFound(u32),
    /// The page has no XObject resource dictionary.
    #[error("page {0} has no XObject resources")]
    XObjectsNotFound(u32),
    /// No image resource on the page matched the selector.
    #[error("no image resource matching {selector} on page {page}")]
    ImageNotFound { page: u32, selector: String },
    /// An image resource lacks a dictionary entry it is addressed by.
    #[error("image object {} {} has no \"{key}\" attribute", id.0, id.1)]
    MissingAttribute { id: ObjectId, key: &'static str },
    /// Image data that cannot be exported or embedded.
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    /// Error from the underlying PDF library.
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    /// Error while decoding or encoding an image file.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    /// Reading the source or replacement file, or writing an output file, failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error means the addressed page, dictionary or image does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::PageNotFound(_) | Error::XObjectsNotFound(_) | Error::ImageNotFound { .. }
        )
    }
}
