use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

/// An XObject dictionary entry of a fixture page.
#[allow(dead_code)]
pub enum Entry {
    /// Indirect reference to the stream.
    Indirect(&'static str, Stream),
    /// The value stored directly in the XObject dictionary.
    Direct(&'static str, Object),
}

#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An uncompressed 8-bit RGB image XObject filled with one colour.
#[allow(dead_code)]
pub fn rgb_image(name: &str, width: u32, height: u32, color: [u8; 3]) -> Stream {
    let content = color.repeat((width * height) as usize);
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Name" => name,
            "Width" => width,
            "Height" => height,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        content,
    )
}

/// A DCT-encoded image XObject holding `jpeg_bytes`.
#[allow(dead_code)]
pub fn jpeg_image(name: &str, jpeg: &[u8]) -> Stream {
    let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).expect("fixture JPEG");
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Name" => name,
            "Width" => decoded.width(),
            "Height" => decoded.height(),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg.to_vec(),
    )
}

#[allow(dead_code)]
pub fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), format).expect("encode fixture image");
    bytes
}

#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color))), ImageFormat::Jpeg)
}

#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color))), ImageFormat::Png)
}

/// Build a document with one page per element of `pages`. A page with no
/// entries gets a resource dictionary without `/XObject`.
#[allow(dead_code)]
pub fn build_document(pages: Vec<Vec<Entry>>) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let count = pages.len() as i64;
    let mut kids = Vec::new();

    for entries in pages {
        let mut resources = Dictionary::new();
        if !entries.is_empty() {
            let mut xobjects = Dictionary::new();
            for entry in entries {
                match entry {
                    Entry::Indirect(key, stream) => {
                        let id = doc.add_object(stream);
                        xobjects.set(key, id);
                    }
                    Entry::Direct(key, object) => xobjects.set(key, object),
                }
            }
            resources.set("XObject", xobjects);
        }
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(595), Object::Integer(842)],
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

#[allow(dead_code)]
pub fn save_document(mut doc: Document, dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    doc.save(&path).expect("save fixture document");
    path
}

/// The 3-page document with images "A" and "B" on page 2 only.
#[allow(dead_code)]
pub fn three_page_document() -> Document {
    build_document(vec![
        vec![],
        vec![
            Entry::Indirect("Im1", rgb_image("A", 2, 2, [255, 0, 0])),
            Entry::Indirect("Im2", rgb_image("B", 3, 1, [0, 0, 255])),
        ],
        vec![],
    ])
}
