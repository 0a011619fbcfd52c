//! Building image XObjects from image files.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::{DynamicImage, ImageFormat};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use log::debug;

use crate::{Error, Result};

const JP2_SIGNATURE: [u8; 12] = [0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A];
const J2K_CODESTREAM: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// An image XObject ready to be added to a document, with its soft mask if
/// the source image carries transparency.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub stream: Stream,
    pub smask: Option<Stream>,
}

impl EmbeddedImage {
    pub fn from_file<P: AsRef<Path>>(path: P, compression_level: u32) -> Result<EmbeddedImage> {
        let buffer = fs::read(&path)?;
        debug!("loaded {} bytes of replacement image {}", buffer.len(), path.as_ref().display());
        Self::from_bytes(buffer, compression_level)
    }

    /// JPEG and JPEG 2000 data is embedded as is; other formats are decoded
    /// and stored as Flate-compressed samples.
    pub fn from_bytes(buffer: Vec<u8>, compression_level: u32) -> Result<EmbeddedImage> {
        if buffer.starts_with(&JP2_SIGNATURE) || buffer.starts_with(&J2K_CODESTREAM) {
            return jpx_image(buffer);
        }

        let format = image::guess_format(&buffer)?;
        if format == ImageFormat::Jpeg {
            return jpeg_image(buffer);
        }

        let img = image::load_from_memory_with_format(&buffer, format)?;
        let level = Compression::new(compression_level.min(9));
        raw_image(&img, level)
    }

    /// Set the `/Name` attribute the image is addressed by.
    pub fn with_name(mut self, name: &str) -> Self {
        self.stream.dict.set("Name", Object::Name(name.as_bytes().to_vec()));
        self
    }

    /// Add the image (and its soft mask) to the document.
    pub fn add_to(self, doc: &mut Document) -> ObjectId {
        let EmbeddedImage { mut stream, smask } = self;
        if let Some(smask) = smask {
            let smask_id = doc.add_object(smask);
            stream.dict.set("SMask", smask_id);
        }
        doc.add_object(stream)
    }
}

fn image_dict(width: u32, height: u32) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
    }
}

fn jpeg_image(buffer: Vec<u8>) -> Result<EmbeddedImage> {
    // Only the marker segments are read, the JPEG data itself is not decoded.
    let header = jpeg_header(&buffer).ok_or_else(|| Error::UnsupportedImage("JPEG data without frame header".into()))?;
    let color_space = match header.components {
        1 => "DeviceGray",
        3 => "DeviceRGB",
        4 => "DeviceCMYK",
        n => return Err(Error::UnsupportedImage(format!("JPEG with {} components", n))),
    };

    let mut dict = image_dict(u32::from(header.width), u32::from(header.height));
    dict.set("ColorSpace", color_space);
    dict.set("BitsPerComponent", 8);
    if header.components == 4 && header.adobe {
        // Adobe CMYK JPEGs store inverted samples.
        dict.set("Decode", [1, 0, 1, 0, 1, 0, 1, 0].map(Object::Integer).to_vec());
    }
    dict.set("Filter", "DCTDecode");
    Ok(EmbeddedImage {
        stream: Stream::new(dict, buffer),
        smask: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegHeader {
    width: u16,
    height: u16,
    components: u8,
    adobe: bool,
}

/// Frame size and component count from the first SOF marker, and whether an
/// Adobe APP14 segment precedes it.
fn jpeg_header(data: &[u8]) -> Option<JpegHeader> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut adobe = false;
    let mut pos = 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        while *data.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = data[pos];
        pos += 1;
        match marker {
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let length = usize::from(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]));
        let segment = data.get(pos + 2..pos + length.checked_sub(2)? + 2)?;
        match marker {
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let frame = segment.get(..6)?;
                return Some(JpegHeader {
                    height: u16::from_be_bytes([frame[1], frame[2]]),
                    width: u16::from_be_bytes([frame[3], frame[4]]),
                    components: frame[5],
                    adobe,
                });
            }
            0xEE if segment.starts_with(b"Adobe") => adobe = true,
            _ => {}
        }
        pos += length;
    }
}

fn jpx_image(buffer: Vec<u8>) -> Result<EmbeddedImage> {
    let (width, height) = jpx_dimensions(&buffer)
        .ok_or_else(|| Error::UnsupportedImage("JPEG 2000 data without image header".into()))?;
    let mut dict = image_dict(width, height);
    dict.set("Filter", "JPXDecode");
    Ok(EmbeddedImage {
        stream: Stream::new(dict, buffer),
        smask: None,
    })
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Width and height from a JP2 `ihdr` box or a raw codestream's SIZ marker.
fn jpx_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.starts_with(&J2K_CODESTREAM) {
        let x = read_u32(data, 8)?.checked_sub(read_u32(data, 16)?)?;
        let y = read_u32(data, 12)?.checked_sub(read_u32(data, 20)?)?;
        return Some((x, y));
    }
    let header = find_box(data, b"jp2h")?;
    let ihdr = find_box(header, b"ihdr")?;
    let height = read_u32(ihdr, 0)?;
    let width = read_u32(ihdr, 4)?;
    Some((width, height))
}

/// Payload of the first box of the given type in a sequence of JP2 boxes.
fn find_box<'a>(mut data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    while data.len() >= 8 {
        let length = read_u32(data, 0)? as usize;
        let (header, length) = match length {
            0 => (8, data.len()),
            1 => (16, usize::try_from(u64::from_be_bytes(data.get(8..16)?.try_into().ok()?)).ok()?),
            n => (8, n),
        };
        if length < header || length > data.len() {
            return None;
        }
        if &data[4..8] == kind {
            return Some(&data[header..length]);
        }
        data = &data[length..];
    }
    None
}

fn compress(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn flate_stream(mut dict: Dictionary, samples: &[u8], level: Compression) -> Result<Stream> {
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compress(samples, level)?))
}

fn to_be_bytes(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

fn raw_image(img: &DynamicImage, level: Compression) -> Result<EmbeddedImage> {
    let (width, height) = (img.width(), img.height());

    // Color samples, alpha samples, colour space and bit depth.
    let (color, alpha, color_space, bits): (Vec<u8>, Option<Vec<u8>>, &str, u8) = match img {
        DynamicImage::ImageLuma8(gray) => (gray.as_raw().clone(), None, "DeviceGray", 8),
        DynamicImage::ImageRgb8(rgb) => (rgb.as_raw().clone(), None, "DeviceRGB", 8),
        DynamicImage::ImageLuma16(gray) => (to_be_bytes(gray.as_raw()), None, "DeviceGray", 16),
        DynamicImage::ImageRgb16(rgb) => (to_be_bytes(rgb.as_raw()), None, "DeviceRGB", 16),
        DynamicImage::ImageLumaA8(gray) => {
            let (color, alpha) = split_alpha(gray.as_raw(), 1);
            (color, opaque_or(alpha, |a| a == u8::MAX), "DeviceGray", 8)
        }
        DynamicImage::ImageLumaA16(gray) => {
            let (color, alpha) = split_alpha(gray.as_raw(), 1);
            (to_be_bytes(&color), opaque_or(alpha, |a| a == u16::MAX).map(|a| to_be_bytes(&a)), "DeviceGray", 16)
        }
        DynamicImage::ImageRgba16(rgba) => {
            let (color, alpha) = split_alpha(rgba.as_raw(), 3);
            (to_be_bytes(&color), opaque_or(alpha, |a| a == u16::MAX).map(|a| to_be_bytes(&a)), "DeviceRGB", 16)
        }
        other if other.color().has_alpha() => {
            let rgba = other.to_rgba8();
            let (color, alpha) = split_alpha(rgba.as_raw(), 3);
            (color, opaque_or(alpha, |a| a == u8::MAX), "DeviceRGB", 8)
        }
        other => (other.to_rgb8().into_raw(), None, "DeviceRGB", 8),
    };

    let mut dict = image_dict(width, height);
    dict.set("ColorSpace", color_space);
    dict.set("BitsPerComponent", bits);
    let stream = flate_stream(dict, &color, level)?;

    let smask = match alpha {
        Some(alpha) => {
            let mut dict = image_dict(width, height);
            dict.set("ColorSpace", "DeviceGray");
            dict.set("BitsPerComponent", bits);
            Some(flate_stream(dict, &alpha, level)?)
        }
        None => None,
    };
    Ok(EmbeddedImage { stream, smask })
}

/// Split interleaved pixels with a trailing alpha channel into colour and alpha samples.
fn split_alpha<T: Copy>(pixels: &[T], color_components: usize) -> (Vec<T>, Vec<T>) {
    let stride = color_components + 1;
    let mut color = Vec::with_capacity(pixels.len() / stride * color_components);
    let mut alpha = Vec::with_capacity(pixels.len() / stride);
    for pixel in pixels.chunks_exact(stride) {
        color.extend_from_slice(&pixel[..color_components]);
        alpha.push(pixel[color_components]);
    }
    (color, alpha)
}

/// `None` when every alpha sample is fully opaque.
fn opaque_or<T: Copy>(alpha: Vec<T>, is_opaque: impl Fn(T) -> bool) -> Option<Vec<T>> {
    if alpha.iter().all(|&a| is_opaque(a)) { None } else { Some(alpha) }
}
