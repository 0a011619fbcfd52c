//! Turning an image XObject stream into a standalone image file.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use lopdf::{Dictionary, Document, Object, Stream};

use crate::{Error, Result};

/// File type an image XObject is exported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// `DCTDecode` data, written unchanged.
    Jpeg,
    /// `JPXDecode` data, written unchanged.
    Jpeg2000,
    /// Raw samples, re-encoded as PNG.
    Png,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Jpeg2000 => "jp2",
            ImageKind::Png => "png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

/// Infer the file type of an image XObject and produce the file's bytes.
///
/// Fails with [`Error::UnsupportedImage`] for encodings that have no file
/// representation here (JBIG2, CCITT fax, unknown colour spaces).
pub fn extract_image(doc: &Document, stream: &Stream) -> Result<ExtractedImage> {
    let filters = filter_names(doc, &stream.dict);
    match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode" | b"DCT") => Ok(ExtractedImage {
            kind: ImageKind::Jpeg,
            bytes: encoded_payload(stream, &filters)?,
        }),
        Some(b"JPXDecode") => Ok(ExtractedImage {
            kind: ImageKind::Jpeg2000,
            bytes: encoded_payload(stream, &filters)?,
        }),
        Some(name @ (b"JBIG2Decode" | b"CCITTFaxDecode" | b"CCF")) => Err(Error::UnsupportedImage(format!(
            "{} encoded image",
            String::from_utf8_lossy(name)
        ))),
        _ => {
            let samples = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream.decompressed_content()?
            };
            let image = raster(doc, &stream.dict, &samples)?;
            let mut bytes = Vec::new();
            image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            Ok(ExtractedImage {
                kind: ImageKind::Png,
                bytes,
            })
        }
    }
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let filter = match dict.get(b"Filter") {
        Ok(filter) => resolve(doc, filter),
        Err(_) => return vec![],
    };
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(names) => names
            .iter()
            .filter_map(|name| resolve(doc, name).as_name().ok())
            .map(<[u8]>::to_vec)
            .collect(),
        _ => vec![],
    }
}

/// The stream bytes with every filter but the last one removed.
fn encoded_payload(stream: &Stream, filters: &[Vec<u8>]) -> Result<Vec<u8>> {
    if filters.len() <= 1 {
        return Ok(stream.content.clone());
    }
    let outer = &filters[..filters.len() - 1];
    let mut inner = stream.clone();
    inner
        .dict
        .set("Filter", outer.iter().cloned().map(Object::Name).collect::<Vec<_>>());
    if let Ok(Object::Array(params)) = stream.dict.get(b"DecodeParms") {
        inner
            .dict
            .set("DecodeParms", params.iter().take(outer.len()).cloned().collect::<Vec<_>>());
    }
    Ok(inner.decompressed_content()?)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn integer(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|value| resolve(doc, value).as_i64().ok())
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorSpace>, hival: usize, lookup: Vec<u8> },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }

    fn from_object(doc: &Document, object: &Object) -> Result<ColorSpace> {
        match resolve(doc, object) {
            Object::Name(name) => Self::from_family(name),
            Object::Array(items) => {
                let family = items
                    .first()
                    .map(|item| resolve(doc, item))
                    .and_then(|item| item.as_name().ok())
                    .ok_or_else(|| Error::UnsupportedImage("empty colour space array".into()))?;
                match family {
                    b"ICCBased" => {
                        let profile = items
                            .get(1)
                            .map(|item| resolve(doc, item))
                            .and_then(|item| item.as_stream().ok())
                            .ok_or_else(|| Error::UnsupportedImage("ICCBased colour space without profile".into()))?;
                        match integer(doc, &profile.dict, b"N") {
                            Some(1) => Ok(ColorSpace::Gray),
                            Some(3) => Ok(ColorSpace::Rgb),
                            Some(4) => Ok(ColorSpace::Cmyk),
                            _ => match profile.dict.get(b"Alternate") {
                                Ok(alternate) => Self::from_object(doc, alternate),
                                Err(_) => Err(Error::UnsupportedImage("ICCBased colour space without /N".into())),
                            },
                        }
                    }
                    b"Indexed" | b"I" => Self::indexed(doc, items),
                    other => Self::from_family(other),
                }
            }
            other => Err(Error::UnsupportedImage(format!("colour space {:?}", other))),
        }
    }

    fn from_family(name: &[u8]) -> Result<ColorSpace> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
            other => Err(Error::UnsupportedImage(format!(
                "{} colour space",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn indexed(doc: &Document, items: &[Object]) -> Result<ColorSpace> {
        let [_, base, hival, lookup] = items else {
            return Err(Error::UnsupportedImage("malformed Indexed colour space".into()));
        };
        let base = Self::from_object(doc, base)?;
        if matches!(base, ColorSpace::Indexed { .. }) {
            return Err(Error::UnsupportedImage("nested Indexed colour space".into()));
        }
        let hival = resolve(doc, hival).as_i64()?.clamp(0, 255) as usize;
        let lookup = match resolve(doc, lookup) {
            Object::String(bytes, _) => bytes.clone(),
            Object::Stream(stream) if stream.dict.has(b"Filter") => stream.decompressed_content()?,
            Object::Stream(stream) => stream.content.clone(),
            other => return Err(Error::UnsupportedImage(format!("Indexed lookup {:?}", other))),
        };
        if lookup.len() < (hival + 1) * base.components() {
            return Err(Error::UnsupportedImage("Indexed lookup table too short".into()));
        }
        Ok(ColorSpace::Indexed {
            base: Box::new(base),
            hival,
            lookup,
        })
    }
}

/// Split packed rows into one value per sample. Rows start on byte boundaries.
fn unpack_samples(data: &[u8], width: usize, height: usize, components: usize, bits: usize) -> Result<Vec<u16>> {
    if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
        return Err(Error::UnsupportedImage(format!("{} bits per component", bits)));
    }
    let too_large = || Error::UnsupportedImage(format!("{}x{} image is too large", width, height));
    let per_row = width.checked_mul(components).ok_or_else(too_large)?;
    let row_bytes = per_row.checked_mul(bits).ok_or_else(too_large)?.div_ceil(8);
    let expected = row_bytes.checked_mul(height).ok_or_else(too_large)?;
    if data.len() < expected {
        return Err(Error::UnsupportedImage(format!(
            "expected {} bytes of samples, found {}",
            expected,
            data.len()
        )));
    }
    let mut samples = Vec::with_capacity(per_row * height);
    for row in data.chunks_exact(row_bytes).take(height) {
        match bits {
            8 => samples.extend(row[..per_row].iter().map(|&b| u16::from(b))),
            16 => samples.extend(row.chunks_exact(2).take(per_row).map(|p| u16::from_be_bytes([p[0], p[1]]))),
            _ => {
                let mask = (1u16 << bits) - 1;
                for i in 0..per_row {
                    let bit = i * bits;
                    let shift = 8 - bits - bit % 8;
                    samples.push((u16::from(row[bit / 8]) >> shift) & mask);
                }
            }
        }
    }
    Ok(samples)
}

fn scale_to_u8(value: u16, bits: usize) -> u8 {
    match bits {
        8 => value as u8,
        16 => (value >> 8) as u8,
        _ => (u32::from(value) * 255 / ((1u32 << bits) - 1)) as u8,
    }
}

fn cmyk_to_rgb(cmyk: [u8; 4]) -> [u8; 3] {
    let k = 255 - u32::from(cmyk[3]);
    let channel = |c: u8| ((255 - u32::from(c)) * k / 255) as u8;
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}

fn is_inverted(doc: &Document, dict: &Dictionary) -> bool {
    let Ok(decode) = dict.get(b"Decode").map(|d| resolve(doc, d)) else {
        return false;
    };
    match decode.as_array() {
        Ok(range) => matches!(range.as_slice(), [lo, hi] if number(lo) == Some(1.0) && number(hi) == Some(0.0)),
        Err(_) => false,
    }
}

fn raster(doc: &Document, dict: &Dictionary, data: &[u8]) -> Result<DynamicImage> {
    let dimension = |key: &[u8]| {
        integer(doc, dict, key)
            .filter(|v| *v > 0)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::UnsupportedImage(format!("missing or invalid {}", String::from_utf8_lossy(key))))
    };
    let width = dimension(b"Width")?;
    let height = dimension(b"Height")?;

    let image_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    let (space, bits) = if image_mask {
        (ColorSpace::Gray, 1)
    } else {
        let space = match dict.get(b"ColorSpace") {
            Ok(space) => ColorSpace::from_object(doc, space)?,
            Err(_) => return Err(Error::UnsupportedImage("image without colour space".into())),
        };
        (space, integer(doc, dict, b"BitsPerComponent").unwrap_or(8) as usize)
    };

    let mut samples = unpack_samples(data, width as usize, height as usize, space.components(), bits)?;
    if space.components() == 1 && !matches!(space, ColorSpace::Indexed { .. }) && is_inverted(doc, dict) {
        let max = if bits == 16 { u16::MAX } else { (1u16 << bits) - 1 };
        samples.iter_mut().for_each(|s| *s = max - *s);
    }

    let buffer_error = || Error::UnsupportedImage("sample buffer does not match dimensions".into());
    let image = match space {
        ColorSpace::Gray if bits == 16 => {
            DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, _>::from_raw(width, height, samples).ok_or_else(buffer_error)?)
        }
        ColorSpace::Rgb if bits == 16 => {
            DynamicImage::ImageRgb16(ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, samples).ok_or_else(buffer_error)?)
        }
        ColorSpace::Gray => {
            let pixels = samples.into_iter().map(|s| scale_to_u8(s, bits)).collect();
            DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
        }
        ColorSpace::Rgb => {
            let pixels = samples.into_iter().map(|s| scale_to_u8(s, bits)).collect();
            DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
        }
        ColorSpace::Cmyk => {
            let pixels = samples
                .chunks_exact(4)
                .flat_map(|p| {
                    cmyk_to_rgb([
                        scale_to_u8(p[0], bits),
                        scale_to_u8(p[1], bits),
                        scale_to_u8(p[2], bits),
                        scale_to_u8(p[3], bits),
                    ])
                })
                .collect();
            DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
        }
        ColorSpace::Indexed { base, hival, lookup } => {
            let n = base.components();
            let entry = |index: u16| {
                let start = usize::from(index).min(hival) * n;
                &lookup[start..start + n]
            };
            match *base {
                ColorSpace::Gray => {
                    let pixels = samples.into_iter().map(|i| entry(i)[0]).collect();
                    DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
                }
                ColorSpace::Rgb => {
                    let pixels = samples.into_iter().flat_map(|i| entry(i).to_vec()).collect();
                    DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
                }
                _ => {
                    let pixels = samples
                        .into_iter()
                        .flat_map(|i| {
                            let c = entry(i);
                            cmyk_to_rgb([c[0], c[1], c[2], c[3]])
                        })
                        .collect();
                    DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels).ok_or_else(buffer_error)?)
                }
            }
        }
    };
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{StringFormat, dictionary};

    fn raw_image(dict: Dictionary, content: Vec<u8>) -> Stream {
        let mut full = dictionary! { "Type" => "XObject", "Subtype" => "Image" };
        full.extend(&dict);
        Stream::new(full, content)
    }

    fn decode_png(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory_with_format(bytes, ImageFormat::Png).unwrap()
    }

    #[test]
    fn jpeg_is_passed_through() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(dictionary! { "Filter" => "DCTDecode" }, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let image = extract_image(&doc, &stream).unwrap();
        assert_eq!(image.kind, ImageKind::Jpeg);
        assert_eq!(image.bytes, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(image.kind.extension(), "jpg");
    }

    #[test]
    fn jpx_is_passed_through() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(
            dictionary! { "Filter" => vec![Object::Name(b"JPXDecode".to_vec())] },
            vec![0xFF, 0x4F, 0xFF, 0x51],
        );
        let image = extract_image(&doc, &stream).unwrap();
        assert_eq!(image.kind, ImageKind::Jpeg2000);
        assert_eq!(image.kind.extension(), "jp2");
    }

    #[test]
    fn jbig2_is_unsupported() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(dictionary! { "Filter" => "JBIG2Decode" }, vec![0; 4]);
        assert!(matches!(extract_image(&doc, &stream), Err(Error::UnsupportedImage(_))));
    }

    #[test]
    fn rgb_samples_become_png() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(
            dictionary! { "Width" => 2, "Height" => 1, "ColorSpace" => "DeviceRGB", "BitsPerComponent" => 8 },
            vec![255, 0, 0, 0, 0, 255],
        );
        let image = extract_image(&doc, &stream).unwrap();
        assert_eq!(image.kind, ImageKind::Png);
        let rgb = decode_png(&image.bytes).to_rgb8();
        assert_eq!(rgb.as_raw(), &vec![255, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn one_bit_gray_with_row_padding() {
        let doc = Document::with_version("1.5");
        // 3 pixels per row, each row padded to one byte.
        let stream = raw_image(
            dictionary! { "Width" => 3, "Height" => 2, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 1 },
            vec![0b1010_0000, 0b0100_0000],
        );
        let gray = decode_png(&extract_image(&doc, &stream).unwrap().bytes).to_luma8();
        assert_eq!(gray.as_raw(), &vec![255, 0, 255, 0, 255, 0]);
    }

    #[test]
    fn inverted_decode_array() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(
            dictionary! {
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Decode" => vec![Object::Integer(1), Object::Integer(0)],
            },
            vec![0, 200],
        );
        let gray = decode_png(&extract_image(&doc, &stream).unwrap().bytes).to_luma8();
        assert_eq!(gray.as_raw(), &vec![255, 55]);
    }

    #[test]
    fn indexed_palette_is_expanded() {
        let doc = Document::with_version("1.5");
        let space = vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            Object::Integer(1),
            Object::String(vec![10, 20, 30, 40, 50, 60], StringFormat::Hexadecimal),
        ];
        let stream = raw_image(
            dictionary! { "Width" => 3, "Height" => 1, "ColorSpace" => space, "BitsPerComponent" => 8 },
            vec![1, 0, 7],
        );
        let rgb = decode_png(&extract_image(&doc, &stream).unwrap().bytes).to_rgb8();
        assert_eq!(rgb.as_raw(), &vec![40, 50, 60, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn icc_based_uses_component_count() {
        let mut doc = Document::with_version("1.5");
        let profile = doc.add_object(Stream::new(dictionary! { "N" => 1 }, vec![]));
        let space = vec![Object::Name(b"ICCBased".to_vec()), Object::Reference(profile)];
        let stream = raw_image(
            dictionary! { "Width" => 1, "Height" => 1, "ColorSpace" => space, "BitsPerComponent" => 8 },
            vec![77],
        );
        let gray = decode_png(&extract_image(&doc, &stream).unwrap().bytes).to_luma8();
        assert_eq!(gray.as_raw(), &vec![77]);
    }

    #[test]
    fn cmyk_is_converted_to_rgb() {
        assert_eq!(cmyk_to_rgb([0, 0, 0, 0]), [255, 255, 255]);
        assert_eq!(cmyk_to_rgb([0, 0, 0, 255]), [0, 0, 0]);
        assert_eq!(cmyk_to_rgb([255, 0, 0, 0]), [0, 255, 255]);
    }

    #[test]
    fn sixteen_bit_samples_keep_depth() {
        let samples = unpack_samples(&[0x12, 0x34, 0xAB, 0xCD], 2, 1, 1, 16).unwrap();
        assert_eq!(samples, vec![0x1234, 0xABCD]);
    }

    #[test]
    fn truncated_samples_are_rejected() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(
            dictionary! { "Width" => 4, "Height" => 4, "ColorSpace" => "DeviceRGB", "BitsPerComponent" => 8 },
            vec![0; 10],
        );
        assert!(matches!(extract_image(&doc, &stream), Err(Error::UnsupportedImage(_))));
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let doc = Document::with_version("1.5");
        let stream = raw_image(
            dictionary! {
                "Width" => 1i64 << 31,
                "Height" => 1i64 << 30,
                "ColorSpace" => "DeviceCMYK",
                "BitsPerComponent" => 16,
            },
            vec![0; 4],
        );
        assert!(matches!(extract_image(&doc, &stream), Err(Error::UnsupportedImage(_))));

        let wide = raw_image(
            dictionary! { "Width" => 1i64 << 40, "Height" => 1, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8 },
            vec![0; 4],
        );
        assert!(matches!(extract_image(&doc, &wide), Err(Error::UnsupportedImage(_))));
        assert!(matches!(
            unpack_samples(&[0; 4], usize::MAX / 2, 3, 4, 16),
            Err(Error::UnsupportedImage(_))
        ));
    }
}
