use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, ObjectId};
use log::{debug, info};

use crate::embed::EmbeddedImage;
use crate::resources::{ImageResource, XObjectSlot, image_resources, locate_xobjects};
use crate::{Error, Result};

/// How the image to replace is picked among a page's image resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// 1-based position among the page's image resources, in dictionary order.
    Index(u32),
    /// Stored `/Name` of the image, compared case-insensitively.
    Name(String),
}

impl Selector {
    /// Build a selector from exactly one of an index and a name.
    /// A name that is empty or only whitespace counts as not given.
    pub fn from_options(index: Option<u32>, name: Option<&str>) -> Result<Selector> {
        let name = name.filter(|name| !name.trim().is_empty());
        match (index, name) {
            (None, None) => Err(Error::InvalidArguments("neither index nor name is set")),
            (Some(_), Some(_)) => Err(Error::InvalidArguments("index and name cannot both be set")),
            (Some(index), None) => Ok(Selector::Index(index)),
            (None, Some(name)) => Ok(Selector::Name(name.to_string())),
        }
    }

    pub fn matches(&self, position: usize, stored_name: &str) -> bool {
        match self {
            Selector::Index(index) => usize::try_from(*index).is_ok_and(|index| index == position),
            Selector::Name(name) => name
                .chars()
                .flat_map(char::to_lowercase)
                .eq(stored_name.chars().flat_map(char::to_lowercase)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Selector::Index(index) => write!(f, "index {}", index),
            Selector::Name(name) => write!(f, "name {:?}", name),
        }
    }
}

/// Options for [`update_image`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Where to save the result; defaults to [`updated_path`] of the source.
    pub output: Option<PathBuf>,
    /// Flate level (0-9) for replacement images stored as raw samples.
    pub compression_level: u32,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            output: None,
            compression_level: 6,
        }
    }
}

impl UpdateOptions {
    pub fn builder() -> UpdateOptionsBuilder {
        UpdateOptionsBuilder::default()
    }
}

#[derive(Default)]
pub struct UpdateOptionsBuilder {
    output: Option<PathBuf>,
    compression_level: Option<u32>,
}

impl UpdateOptionsBuilder {
    pub fn output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Set compression level (0-9)
    pub fn compression_level(mut self, value: u32) -> Self {
        self.compression_level = Some(value.min(9));
        self
    }

    pub fn build(self) -> UpdateOptions {
        let defaults = UpdateOptions::default();
        UpdateOptions {
            output: self.output,
            compression_level: self.compression_level.unwrap_or(defaults.compression_level),
        }
    }
}

/// `<dir>/<stem>-updated<.ext>` next to the source file.
pub fn updated_path(source: &Path) -> PathBuf {
    let mut file_name = source.file_stem().map(OsString::from).unwrap_or_default();
    file_name.push("-updated");
    if let Some(extension) = source.extension() {
        file_name.push(".");
        file_name.push(extension);
    }
    source.with_file_name(file_name)
}

/// A selected image resource and the dictionary it was found in.
#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub slot: XObjectSlot,
    pub resource: ImageResource,
    pub name: String,
}

/// Find the image resource on a page matching the selector.
pub fn find_image(doc: &Document, page: u32, selector: &Selector) -> Result<SelectedImage> {
    let page_id = *doc.get_pages().get(&page).ok_or(Error::PageNotFound(page))?;
    let slot = locate_xobjects(doc, page_id)?.ok_or(Error::XObjectsNotFound(page))?;
    for resource in image_resources(doc, slot.dict(doc)?) {
        let name = resource.stored_name(doc)?;
        if selector.matches(resource.position, &name) {
            debug!(
                "{} selects /{} ({} {}) on page {}",
                selector,
                String::from_utf8_lossy(&resource.key),
                resource.id.0,
                resource.id.1,
                page
            );
            return Ok(SelectedImage { slot, resource, name });
        }
    }
    Err(Error::ImageNotFound {
        page,
        selector: selector.to_string(),
    })
}

/// Point the selected XObject entry at a new image object.
///
/// Only the entry in the XObject dictionary changes; the previous image object
/// stays in the document for any other page that refers to it. The new image
/// carries over the stored name of the one it replaces.
pub fn replace_image(doc: &mut Document, page: u32, selector: &Selector, replacement: EmbeddedImage) -> Result<ObjectId> {
    let selected = find_image(doc, page, selector)?;
    replace_selected(doc, &selected, replacement)
}

fn replace_selected(doc: &mut Document, selected: &SelectedImage, replacement: EmbeddedImage) -> Result<ObjectId> {
    let image_id = replacement.with_name(&selected.name).add_to(doc);
    selected
        .slot
        .dict_mut(doc)?
        .set(selected.resource.key.clone(), Object::Reference(image_id));
    Ok(image_id)
}

/// Replace one image on a page of `source` with the image file at `image`,
/// saving the result to a new file. Returns the path written.
pub fn update_image<P, Q>(source: P, page: u32, selector: &Selector, image: Q, options: &UpdateOptions) -> Result<PathBuf>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let source = source.as_ref();
    let mut doc = Document::load(source)?;
    let output = options.output.clone().unwrap_or_else(|| updated_path(source));

    let selected = find_image(&doc, page, selector)?;
    let replacement = EmbeddedImage::from_file(image, options.compression_level)?;
    let image_id = replace_selected(&mut doc, &selected, replacement)?;
    debug!("added image object {} {}", image_id.0, image_id.1);

    doc.save(&output)?;
    info!("saved {}", output.display());
    Ok(output)
}
