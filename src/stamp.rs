//! Overlays the signature image and a caption onto PDF pages.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::Deserialize;

use crate::{Error, ExactArrayOrNone, Result};

/// Resource name of the signature image inside stamped pages.
const IMAGE_NAME: &[u8] = b"SealImage";
/// Resource name of the caption font inside stamped pages.
const FONT_NAME: &[u8] = b"SealCaption";

const CAPTION_FONT_SIZE: f64 = 5.0;
/// Distance between the bottom of the signature box and the caption baseline.
const CAPTION_OFFSET: f64 = 6.0;
const CAPTION_GRAY: f64 = 0.5;

/// Used for pages without a MediaBox anywhere in their page tree.
const US_LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Where to draw the signature on a page.
///
/// Coordinates are fractions of the page size, measured from the top-left
/// corner. They are expected in `[0, 1]` but not validated; values outside
/// that range just draw off the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignaturePlacement {
    /// 1-based page number.
    #[serde(default = "first_page")]
    pub page: i64,
    pub x_percent: f64,
    pub y_percent: f64,
    pub width_percent: f64,
    pub height_percent: f64,
}

fn first_page() -> i64 {
    1
}

/// A rectangle in PDF user space (origin at the bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SignaturePlacement {
    /// Parses the JSON array of placements sent by clients.
    pub fn parse_list(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json).map_err(Error::InvalidPlacements)
    }

    /// 0-based page index, `None` for page numbers below 1.
    pub fn page_index(&self) -> Option<usize> {
        usize::try_from(self.page.checked_sub(1)?).ok()
    }

    /// The absolute rectangle of this placement on a page with the given
    /// MediaBox.
    pub fn rect_on(&self, media_box: [f32; 4]) -> Rect {
        let [llx, lly, urx, ury] = media_box.map(f64::from);
        let page_width = urx - llx;
        let page_height = ury - lly;

        let width = self.width_percent * page_width;
        let height = self.height_percent * page_height;
        let top = self.y_percent * page_height;
        Rect {
            x: llx + self.x_percent * page_width,
            // PDF coordinates grow upwards.
            y: lly + page_height - top - height,
            width,
            height,
        }
    }
}

/// A decoded signature image, ready to be embedded as an image XObject.
pub struct StampImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    /// Present only when some pixel is not fully opaque.
    alpha: Option<Vec<u8>>,
}

impl StampImage {
    /// Decodes a PNG or JPEG image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage);
        }

        let pixel_count = width as usize * height as usize;
        let mut rgb = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(pixel_count);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }
        let translucent = alpha.iter().any(|&a| a != u8::MAX);

        Ok(Self {
            width,
            height,
            rgb,
            alpha: translucent.then_some(alpha),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Largest size with the image aspect ratio that fits in `width` x
    /// `height`.
    fn fit(&self, width: f64, height: f64) -> (f64, f64) {
        let scale = (width / f64::from(self.width)).min(height / f64::from(self.height));
        (f64::from(self.width) * scale, f64::from(self.height) * scale)
    }

    fn add_to(&self, doc: &mut Document) -> Result<ObjectId> {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(self.width),
            "Height" => i64::from(self.height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };

        if let Some(alpha) = &self.alpha {
            let smask = flate_stream(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(self.width),
                    "Height" => i64::from(self.height),
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha,
            )?;
            dict.set("SMask", doc.add_object(smask));
        }

        Ok(doc.add_object(flate_stream(dict, &self.rgb)?))
    }
}

fn flate_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, encoder.finish()?))
}

/// Draws `image` and `caption` at every placement that targets an existing
/// page of `doc`.
///
/// Placements for pages the document does not have are ignored. Pages
/// without placements are left untouched. Returns the 1-based numbers of the
/// stamped pages.
pub fn stamp_document(
    doc: &mut Document,
    placements: &[SignaturePlacement],
    image: &StampImage,
    caption: &str,
) -> Result<Vec<u32>> {
    let mut by_page: BTreeMap<usize, Vec<&SignaturePlacement>> = BTreeMap::new();
    for placement in placements {
        match placement.page_index() {
            Some(index) => by_page.entry(index).or_default().push(placement),
            None => tracing::debug!(page = placement.page, "ignoring placement before first page"),
        }
    }

    let pages = doc.get_pages();
    let targets: Vec<(u32, ObjectId, Vec<&SignaturePlacement>)> = pages
        .iter()
        .enumerate()
        .filter_map(|(index, (&number, &page_id))| {
            by_page
                .remove(&index)
                .map(|placements| (number, page_id, placements))
        })
        .collect();
    for index in by_page.keys() {
        tracing::debug!(
            page = index + 1,
            page_count = pages.len(),
            "ignoring placement past the last page"
        );
    }

    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let image_id = image.add_to(doc)?;
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut stamped = Vec::with_capacity(targets.len());
    for (number, page_id, placements) in targets {
        let page_box = media_box(doc, page_id)?;
        let overlay = overlay_content(&placements, page_box, image, caption)?;
        add_resources(doc, page_id, image_id, font_id)?;
        append_overlay(doc, page_id, overlay)?;
        stamped.push(number);
    }

    Ok(stamped)
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Content drawn over a page. It starts by closing the `q` that
/// [`append_overlay`] puts in front of the original content, so the overlay
/// always starts from the default graphics state.
fn overlay_content(
    placements: &[&SignaturePlacement],
    media_box: [f32; 4],
    image: &StampImage,
    caption: &str,
) -> Result<Vec<u8>> {
    let mut operations = vec![Operation::new("Q", vec![])];

    for placement in placements {
        let rect = placement.rect_on(media_box);
        let (draw_width, draw_height) = image.fit(rect.width, rect.height);
        let draw_x = rect.x + (rect.width - draw_width) / 2.0;
        let draw_y = rect.y + (rect.height - draw_height) / 2.0;

        operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(draw_width),
                    Object::Integer(0),
                    Object::Integer(0),
                    real(draw_height),
                    real(draw_x),
                    real(draw_y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.to_vec())]),
            Operation::new("Q", vec![]),
            Operation::new("q", vec![]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(FONT_NAME.to_vec()), real(CAPTION_FONT_SIZE)],
            ),
            Operation::new(
                "rg",
                vec![real(CAPTION_GRAY), real(CAPTION_GRAY), real(CAPTION_GRAY)],
            ),
            Operation::new("Td", vec![real(rect.x), real(rect.y - CAPTION_OFFSET)]),
            Operation::new("Tj", vec![Object::string_literal(caption)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }

    Ok(Content { operations }.encode()?)
}

/// Looks up a page attribute, following the page tree up when the page
/// inherits it. Returns the resolved value.
fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Result<Option<Object>> {
    let mut seen = HashSet::new();
    let mut current = Some(page_id);

    while let Some(id) = current {
        if !seen.insert(id) {
            // Cycle in the /Parent chain.
            return Err(lopdf::Error::ReferenceLimit.into());
        }
        let node = doc.get_dictionary(id)?;
        if let Ok(value) = node.get(key) {
            return Ok(Some(doc.dereference(value)?.1.clone()));
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Ok(None)
}

fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f32; 4]> {
    let Some(media_box) = inherited_attribute(doc, page_id, b"MediaBox")? else {
        return Ok(US_LETTER);
    };

    Ok(media_box
        .as_array()?
        .iter()
        .map(|v| doc.dereference(v).and_then(|(_, v)| v.as_float()))
        .collect::<lopdf::Result<ExactArrayOrNone<f32, 4>>>()?
        .0
        .ok_or(lopdf::Error::Type)?)
}

/// Gives the page its own copy of its (possibly inherited) resources, with
/// the signature image and caption font added.
fn add_resources(
    doc: &mut Document,
    page_id: ObjectId,
    image_id: ObjectId,
    font_id: ObjectId,
) -> Result<()> {
    let mut resources = match inherited_attribute(doc, page_id, b"Resources")? {
        Some(Object::Dictionary(dict)) => dict,
        Some(_) => return Err(lopdf::Error::Type.into()),
        None => Dictionary::new(),
    };

    add_named_resource(doc, &mut resources, b"XObject", IMAGE_NAME, image_id)?;
    add_named_resource(doc, &mut resources, b"Font", FONT_NAME, font_id)?;

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", resources);
    Ok(())
}

fn add_named_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    name: &[u8],
    id: ObjectId,
) -> Result<()> {
    let mut entries = match resources.get(category) {
        Ok(obj) => doc.dereference(obj)?.1.as_dict()?.clone(),
        Err(_) => Dictionary::new(),
    };
    entries.set(name, id);
    resources.set(category, entries);
    Ok(())
}

/// Appends `overlay` as a new content stream of the page, isolating the
/// original content in a `q`/`Q` pair.
fn append_overlay(doc: &mut Document, page_id: ObjectId, overlay: Vec<u8>) -> Result<()> {
    let mut contents = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(streams) => streams.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(streams)) => streams.clone(),
        Ok(_) => return Err(lopdf::Error::Type.into()),
        Err(_) => Vec::new(),
    };

    let open = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let overlay = doc.add_object(Stream::new(Dictionary::new(), overlay));
    contents.insert(0, open.into());
    contents.push(overlay.into());

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", contents);
    Ok(())
}
