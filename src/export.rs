use std::fs;
use std::path::{Component, Path, PathBuf};

use lopdf::Document;
use log::{debug, info};

use crate::decode::{ImageKind, extract_image};
use crate::resources::{image_resources, locate_xobjects};
use crate::Result;

/// An image file written by [`export_images`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub page: u32,
    pub name: String,
    pub kind: ImageKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub files: Vec<ExportedFile>,
    /// Image resources that were found but could not be turned into a file.
    pub skipped: usize,
}

/// Export every image XObject of a PDF file to `<output>/<page>/<name>.<ext>`.
pub fn export_images<P, Q>(source: P, output: Q) -> Result<ExportSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let doc = Document::load(source.as_ref())?;
    debug!("loaded {} with {} pages", source.as_ref().display(), doc.get_pages().len());
    export_document(&doc, output.as_ref())
}

/// Export the image XObjects of a loaded document.
///
/// Pages are processed from last to first. Every page gets a directory named
/// after its 1-based number, whether or not it has images. Existing files are
/// overwritten.
pub fn export_document(doc: &Document, output: &Path) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();
    for (&page, &page_id) in doc.get_pages().iter().rev() {
        let directory = output.join(page.to_string());
        fs::create_dir_all(&directory)?;

        let Some(slot) = locate_xobjects(doc, page_id)? else {
            debug!("page {} has no XObject resources", page);
            continue;
        };
        let xobjects = slot.dict(doc)?;
        for resource in image_resources(doc, xobjects) {
            let name = resource.stored_name(doc)?;
            if !is_plain_file_name(&name) {
                debug!("skipping image {:?} on page {}: name is not a plain file name", name, page);
                summary.skipped += 1;
                continue;
            }
            let image = match extract_image(doc, resource.stream(doc)?) {
                Ok(image) => image,
                Err(err) => {
                    debug!("skipping image {} on page {}: {}", name, page, err);
                    summary.skipped += 1;
                    continue;
                }
            };
            let path = directory.join(&name).with_extension(image.kind.extension());
            fs::write(&path, &image.bytes)?;
            info!("wrote {}", path.display());
            summary.files.push(ExportedFile {
                page,
                name,
                kind: image.kind,
                path,
            });
        }
    }
    Ok(summary)
}

/// The name must stay inside the page directory: a single normal path component.
fn is_plain_file_name(name: &str) -> bool {
    if name.chars().any(std::path::is_separator) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_file_names() {
        for name in ["A", "cover.old", "Im 1", ".hidden"] {
            assert!(is_plain_file_name(name), "{}", name);
        }
        for name in ["", ".", "..", "/tmp/x", "../x", "a/b", "a/../b", "a/."] {
            assert!(!is_plain_file_name(name), "{}", name);
        }
    }
}
