//! Renderer selection, and the PDFium-free fallback that reads the scan
//! image embedded in each page.
//!
//! A scanned report page is normally one large image XObject, so pulling it
//! out gives recognition the scan at its own resolution without any native
//! library.

use image::{DynamicImage, GenericImageView, GrayImage, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use super::pdfium::PdfiumRenderer;
use super::types::{PdfPageRenderer, RenderedPage};
use super::ExtractionError;

/// PDFium when the shared library loads, embedded images otherwise.
pub fn default_page_renderer() -> Box<dyn PdfPageRenderer> {
    match PdfiumRenderer::new() {
        Ok(renderer) => Box::new(renderer),
        Err(e) => {
            info!(error = %e, "PDFium unavailable, reading embedded page images");
            Box::new(LopdfImageExtractor)
        }
    }
}

/// Takes the largest image XObject of every page. `dpi` is ignored.
pub struct LopdfImageExtractor;

impl PdfPageRenderer for LopdfImageExtractor {
    fn render_pages(&self, pdf_bytes: &[u8], _dpi: u32) -> Result<Vec<RenderedPage>, ExtractionError> {
        let doc = Document::load_mem(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(format!("Failed to parse PDF: {e}")))?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(ExtractionError::PdfEncrypted);
        }

        let page_ids: Vec<ObjectId> = doc.page_iter().collect();
        Ok(page_ids
            .into_iter()
            .enumerate()
            .map(|(index, page_id)| {
                page_image(&doc, page_id).map_err(|e| ExtractionError::PdfRendering {
                    page: index,
                    reason: e.to_string(),
                })
            })
            .collect())
    }
}

fn page_image(doc: &Document, page_id: ObjectId) -> Result<DynamicImage, ExtractionError> {
    let page = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| ExtractionError::PdfParsing(format!("Page object error: {e}")))?;
    let resources = dict_entry(doc, page, b"Resources")?;
    let xobjects = dict_entry(doc, resources, b"XObject")?;

    let largest = xobjects
        .iter()
        .filter_map(|(_, obj)| match resolve(doc, obj) {
            Object::Stream(stream) if is_image(&stream.dict) => Some(stream),
            _ => None,
        })
        .max_by_key(|stream| stream.content.len())
        .ok_or_else(|| ExtractionError::PdfParsing("Page holds no image".into()))?;

    let image = decode_stream(doc, largest)?;
    let (width, height) = image.dimensions();
    debug!(width, height, encoded = largest.content.len(), "Embedded page image decoded");
    Ok(image)
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

/// JPEG (DCTDecode) and other self-describing streams decode directly; bare
/// pixel buffers are rebuilt from /Width, /Height and /ColorSpace.
fn decode_stream(doc: &Document, stream: &Stream) -> Result<DynamicImage, ExtractionError> {
    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    if let Ok(image) = image::load_from_memory(&content) {
        return Ok(image);
    }
    raw_pixels_to_image(doc, &stream.dict, content)
}

fn raw_pixels_to_image(doc: &Document, dict: &Dictionary, mut pixels: Vec<u8>) -> Result<DynamicImage, ExtractionError> {
    let width = int_entry(dict, b"Width")? as u32;
    let height = int_entry(dict, b"Height")? as u32;
    let bits = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(ExtractionError::ImageProcessing(format!(
            "Unsupported bits per component: {bits}"
        )));
    }

    let channels = color_channels(doc, dict);
    let expected = (width * height * channels) as usize;
    if pixels.len() < expected {
        return Err(ExtractionError::ImageProcessing(format!(
            "Pixel buffer holds {} bytes, {width}x{height}x{channels} needs {expected}",
            pixels.len()
        )));
    }
    pixels.truncate(expected);

    let image = match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        // CMYK read as RGBA; recognition only needs luminance contrast
        4 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        other => {
            return Err(ExtractionError::ImageProcessing(format!(
                "Unsupported channel count: {other}"
            )))
        }
    };
    image.ok_or_else(|| ExtractionError::ImageProcessing("Pixel buffer does not fit the image size".into()))
}

/// Channel count from /ColorSpace; RGB when absent or unrecognized.
fn color_channels(doc: &Document, dict: &Dictionary) -> u32 {
    let Ok(cs) = dict.get(b"ColorSpace") else {
        return 3;
    };
    match resolve(doc, cs) {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" => 1,
            b"DeviceCMYK" => 4,
            _ => 3,
        },
        Object::Array(arr) => match arr.first() {
            Some(Object::Name(n)) if n == b"ICCBased" => arr
                .get(1)
                .map(|o| resolve(doc, o))
                .and_then(|o| o.as_stream().ok())
                .and_then(|s| int_entry(&s.dict, b"N").ok())
                .map_or(3, |n| n as u32),
            Some(Object::Name(n)) if n == b"Indexed" => 1,
            _ => 3,
        },
        _ => 3,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Result<&'a Dictionary, ExtractionError> {
    let name = String::from_utf8_lossy(key);
    let obj = dict
        .get(key)
        .map_err(|_| ExtractionError::PdfParsing(format!("Missing /{name} in dictionary")))?;
    resolve(doc, obj)
        .as_dict()
        .map_err(|_| ExtractionError::PdfParsing(format!("/{name} is not a dictionary")))
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<i64, ExtractionError> {
    let name = String::from_utf8_lossy(key);
    dict.get(key)
        .map_err(|_| ExtractionError::PdfParsing(format!("Missing /{name} in image dictionary")))?
        .as_i64()
        .map_err(|_| ExtractionError::PdfParsing(format!("/{name} is not an integer")))
}

/// Build a PDF whose pages each hold one embedded JPEG.
#[cfg(test)]
pub(crate) fn make_scanned_pdf(page_images: &[Vec<u8>]) -> Vec<u8> {
    use image::GenericImageView;
    use lopdf::dictionary;

    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for jpeg in page_images {
        let (w, h) = image::load_from_memory(jpeg)
            .map(|img| (img.width(), img.height()))
            .unwrap();
        let mut img_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w as i64,
                "Height" => h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
                "Length" => jpeg.len() as i64,
            },
            jpeg.clone(),
        );
        img_stream.allows_compression = false;
        let img_id = doc.add_object(Object::Stream(img_stream));

        let content = Stream::new(dictionary! {}, b"q 612 0 0 792 0 0 cm /Scan Do Q".to_vec());
        let content_id = doc.add_object(Object::Stream(content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Scan" => img_id,
                },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
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

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

#[cfg(test)]
pub(crate) fn make_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([250u8, 250, 250]));
    let mut jpeg_bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut jpeg_bytes, image::ImageOutputFormat::Jpeg(85))
        .unwrap();
    jpeg_bytes.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LopdfImageExtractor>();
    }

    #[test]
    fn one_image_per_page_at_scan_resolution() {
        let pdf = make_scanned_pdf(&[make_test_jpeg(200, 300), make_test_jpeg(30, 30)]);
        let pages = LopdfImageExtractor.render_pages(&pdf, 300).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].as_ref().unwrap().dimensions(), (200, 300));
        assert_eq!(pages[1].as_ref().unwrap().dimensions(), (30, 30));
    }

    #[test]
    fn text_only_page_fails_its_own_slot() {
        let pdf = super::super::pdf::make_text_pdf(&["Hello"]);
        let pages = LopdfImageExtractor.render_pages(&pdf, 300).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(matches!(pages[0], Err(ExtractionError::PdfRendering { page: 0, .. })));
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(
            LopdfImageExtractor.render_pages(b"%PDF-broken", 300),
            Err(ExtractionError::PdfParsing(_))
        ));
    }

    #[test]
    fn raw_gray_pixels_are_rebuilt() {
        use lopdf::dictionary;

        let doc = Document::with_version("1.4");
        let dict = dictionary! {
            "Width" => 2,
            "Height" => 2,
            "BitsPerComponent" => 8,
            "ColorSpace" => "DeviceGray",
        };
        let image = raw_pixels_to_image(&doc, &dict, vec![0, 255, 255, 0, 9]).unwrap();
        assert_eq!(image.to_luma8().into_raw(), vec![0, 255, 255, 0]);
        assert!(raw_pixels_to_image(&doc, &dict, vec![0, 1]).is_err());
    }
}
