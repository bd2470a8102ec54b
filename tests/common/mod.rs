//! Fixtures for the HTTP tests: documents, images, keys and form bodies.
//!
//! `src/test_util.rs` is compiled only into the unit tests, so integration
//! tests can not reach it. The document here is also laid out the other way
//! round: every page carries its own MediaBox and Resources, where the unit
//! fixture makes its pages inherit both from /Pages.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use axum::Router;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf_seal::openssl::{generate_protected_key, GeneratedKeyPair};
use pdf_seal::trust_store::register;
use pdf_seal::{server, Config, JsonFileTrustStore};

pub const PASSPHRASE: &str = "correct horse";
pub const USER: &str = "alice";
pub const IMAGE: &str = "alice.png";

pub fn keys() -> &'static GeneratedKeyPair {
    static KEYS: OnceLock<GeneratedKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| generate_protected_key(PASSPHRASE, 2048).unwrap())
}

/// A Letter sized document, every page with its own MediaBox, resources and
/// content.
pub fn two_page_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Roman",
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in ["First page", "Second page"] {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(18)]),
                Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 2,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn png(color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(60, 20, Rgba(color));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageOutputFormat::Png).unwrap();
    bytes.into_inner()
}

/// Decoded content of each page, in page order.
pub fn page_contents(pdf: &[u8]) -> Vec<Vec<u8>> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| doc.get_page_content(page_id).unwrap())
        .collect()
}

/// A service over a fresh trust store, with [`USER`] registered.
pub struct Service {
    pub dir: tempfile::TempDir,
    pub config: Config,
}

impl Service {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            trust_store: dir.path().join("users_db.json"),
            images_dir: dir.path().join("signatures"),
            ..Config::default()
        };
        std::fs::create_dir(&config.images_dir).unwrap();
        std::fs::write(config.images_dir.join(IMAGE), png([20, 40, 160, 255])).unwrap();
        register(
            &JsonFileTrustStore::new(&config.trust_store),
            &config.images_dir,
            USER,
            IMAGE,
        )
        .unwrap();

        Service { dir, config }
    }

    pub fn image_path(&self) -> PathBuf {
        self.config.images_dir.join(IMAGE)
    }

    pub fn router(&self) -> Router {
        server::router(
            Arc::new(server::signer_from_config(&self.config)),
            &self.config,
        )
    }
}

/// Builds `multipart/form-data` bodies.
pub struct Form {
    boundary: &'static str,
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Form {
            boundary: "pdf-seal-test-boundary-7MA4YWxk",
            body: Vec::new(),
        }
    }

    pub fn text(self, name: &str, value: &str) -> Self {
        self.part(name, None, value.as_bytes())
    }

    pub fn file(self, name: &str, file_name: &str, content: &[u8]) -> Self {
        self.part(name, Some(file_name), content)
    }

    fn part(mut self, name: &str, file_name: Option<&str>, content: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        match file_name {
            Some(file_name) => self.body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => self.body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Returns the `Content-Type` header value and the body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

/// A complete, valid request form for [`USER`].
pub fn valid_form(placements: &str) -> Form {
    Form::new()
        .file("file", "input.pdf", &two_page_pdf())
        .file("private_key", "key.pem", &keys().private_pem)
        .text("password", PASSPHRASE)
        .text("signatures", placements)
        .text("user_id", USER)
}
