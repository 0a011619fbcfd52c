//! Export the images of a PDF document and replace single image XObjects.
//!
//! Images are addressed the way they appear in a page's `/XObject` resource
//! dictionary: only indirect streams with `/Type /XObject` and
//! `/Subtype /Image` count, in dictionary order, and each is identified by
//! its 1-based position or by its own `/Name` attribute.

mod error;
pub use error::{Error, Result};

pub mod decode;
pub mod embed;
pub mod resources;

mod export;
pub use export::{ExportSummary, ExportedFile, export_document, export_images};

mod update;
pub use update::{
    SelectedImage, Selector, UpdateOptions, UpdateOptionsBuilder, find_image, replace_image, update_image, updated_path,
};

pub use decode::ImageKind;
pub use embed::EmbeddedImage;
