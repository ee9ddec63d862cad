//! Metalink documents
//!
//! A [`DownloadQueue`] is written as a metalink (`urn:ietf:params:xml:ns:metalink`)
//! document: one `<file>` per database or package with its mirror `<url>`s,
//! package metadata (`identity`, `size`, `version`, `description`, `hash`),
//! and a sibling `<file>` named `<file>.sig` when the signature is wanted.
//!
//! [`get_info`] reads such a document back into a map keyed by identity, or
//! by file name for entries without one.

use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::error::{PlannerError, Result};
use crate::logic::queue::{DownloadQueue, MAX_URLS};

pub const METALINK_NS: &str = "urn:ietf:params:xml:ns:metalink";

fn xml_err(e: impl std::fmt::Display) -> PlannerError {
    PlannerError::metalink(e.to_string())
}

struct MetalinkWriter {
    writer: Writer<Vec<u8>>,
}

impl MetalinkWriter {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        let mut root = BytesStart::new("metalink");
        root.push_attribute(("xmlns", METALINK_NS));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;
        Ok(Self { writer })
    }

    fn text_element(&mut self, tag: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        let mut start = BytesStart::new(tag);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        if text.is_empty() {
            return self.writer.write_event(Event::Empty(start)).map_err(xml_err);
        }
        self.writer.write_event(Event::Start(start)).map_err(xml_err)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
        self.writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(xml_err)
    }

    fn open_file(&mut self, name: &str) -> Result<()> {
        let mut file = BytesStart::new("file");
        file.push_attribute(("name", name));
        self.writer.write_event(Event::Start(file)).map_err(xml_err)
    }

    fn close_file(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new("file")))
            .map_err(xml_err)
    }

    fn urls<'u>(&mut self, urls: impl IntoIterator<Item = &'u String>, suffix: &str) -> Result<()> {
        for url in urls {
            self.text_element("url", &[], &format!("{}{}", url, suffix))?;
        }
        Ok(())
    }

    /// A file holding nothing but URLs, e.g. a signature.
    fn plain_file(&mut self, name: &str, urls: &[String], suffix: &str) -> Result<()> {
        self.open_file(name)?;
        self.urls(urls.iter().take(MAX_URLS), suffix)?;
        self.close_file()
    }

    fn finish(mut self) -> Result<String> {
        self.writer
            .write_event(Event::End(BytesEnd::new("metalink")))
            .map_err(xml_err)?;
        String::from_utf8(self.writer.into_inner()).map_err(xml_err)
    }
}

/// Render a download queue as a metalink document.
pub fn to_metalink(queue: &DownloadQueue) -> Result<String> {
    let mut doc = MetalinkWriter::new()?;

    for db in &queue.dbs {
        doc.plain_file(&db.filename, &db.urls, "")?;
        if db.wants_sig {
            doc.plain_file(&format!("{}.sig", db.filename), &db.urls, ".sig")?;
        }
    }

    for entry in &queue.packages {
        let pkg = &entry.package;
        doc.open_file(&pkg.filename)?;
        doc.text_element("identity", &[], &pkg.name)?;
        doc.text_element("size", &[], &pkg.size.to_string())?;
        doc.text_element("version", &[], &pkg.version)?;
        doc.text_element("description", &[], &pkg.desc)?;
        if let Some(sha256) = &pkg.sha256sum {
            doc.text_element("hash", &[("type", "sha256")], sha256)?;
        }
        if let Some(md5) = &pkg.md5sum {
            doc.text_element("hash", &[("type", "md5")], md5)?;
        }
        doc.urls(entry.urls.iter().take(MAX_URLS), "")?;
        doc.close_file()?;

        if entry.wants_sig {
            doc.plain_file(&format!("{}.sig", pkg.filename), &entry.urls, ".sig")?;
        }
    }

    doc.finish()
}

/// One `<file>` of a metalink document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetalinkFile {
    pub filename: String,
    pub identity: Option<String>,
    pub size: Option<u64>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Hash type (`sha256`, `md5`) → hex digest
    pub hashes: BTreeMap<String, String>,
    pub urls: Vec<String>,
}

impl MetalinkFile {
    pub fn key(&self) -> &str {
        self.identity.as_deref().unwrap_or(&self.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Identity,
    Size,
    Version,
    Description,
    Hash,
    Url,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"identity" => Some(Self::Identity),
            b"size" => Some(Self::Size),
            b"version" => Some(Self::Version),
            b"description" => Some(Self::Description),
            b"hash" => Some(Self::Hash),
            b"url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// Read a metalink document; URL lists are cut to [`MAX_URLS`].
pub fn get_info(xml: &str) -> Result<BTreeMap<String, MetalinkFile>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut files = BTreeMap::new();
    let mut current: Option<MetalinkFile> = None;
    let mut field: Option<Field> = None;
    let mut hash_type = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PlannerError::metalink(format!("at byte {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(start) => {
                let tag = start.local_name();
                if tag.as_ref() == b"file" {
                    let name = start
                        .try_get_attribute("name")
                        .map_err(xml_err)?
                        .ok_or_else(|| PlannerError::metalink("<file> without a name"))?
                        .unescape_value()
                        .map_err(xml_err)?
                        .into_owned();
                    current = Some(MetalinkFile {
                        filename: name,
                        ..Default::default()
                    });
                } else if current.is_some() {
                    field = Field::from_tag(tag.as_ref());
                    if field == Some(Field::Hash) {
                        hash_type = match start.try_get_attribute("type").map_err(xml_err)? {
                            Some(attr) => attr.unescape_value().map_err(xml_err)?.into_owned(),
                            None => String::new(),
                        };
                    }
                }
            }
            Event::Text(text) => {
                let (Some(file), Some(kind)) = (current.as_mut(), field) else {
                    continue;
                };
                let text = text.unescape().map_err(xml_err)?.into_owned();
                match kind {
                    Field::Identity => file.identity = Some(text),
                    Field::Size => {
                        file.size = Some(text.parse().map_err(|_| {
                            PlannerError::metalink(format!("bad size {:?} for {}", text, file.filename))
                        })?)
                    }
                    Field::Version => file.version = Some(text),
                    Field::Description => file.description = Some(text),
                    Field::Hash => {
                        file.hashes.insert(std::mem::take(&mut hash_type), text);
                    }
                    Field::Url => file.urls.push(text),
                }
            }
            Event::End(end) => {
                if end.local_name().as_ref() == b"file" {
                    if let Some(mut file) = current.take() {
                        file.urls.truncate(MAX_URLS);
                        files.insert(file.key().to_string(), file);
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::pkgset::Package;
    use crate::logic::queue::{DbEntry, PkgEntry};

    fn queue() -> DownloadQueue {
        let mut pkg = Package::new("bash", "5.2-1", "core");
        pkg.size = 1_843_200;
        pkg.desc = "The GNU Bourne Again shell & more".into();
        pkg.sha256sum = Some("ab".repeat(32));
        pkg.md5sum = Some("cd".repeat(16));
        DownloadQueue {
            dbs: vec![DbEntry {
                repo: "core".into(),
                filename: "core.db".into(),
                urls: vec!["https://m.example/core/core.db".into()],
                wants_sig: true,
            }],
            packages: vec![PkgEntry {
                urls: vec![format!("https://m.example/core/{}", pkg.filename)],
                package: pkg,
                wants_sig: false,
            }],
        }
    }

    #[test]
    fn test_document_shape() {
        let xml = to_metalink(&queue()).expect("render"); // test: known-good queue
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<metalink xmlns="urn:ietf:params:xml:ns:metalink">"#));
        assert!(xml.contains(r#"<file name="core.db.sig">"#));
        assert!(xml.contains("<url>https://m.example/core/core.db.sig</url>"));
        assert!(xml.contains(r#"<hash type="sha256">"#));
        assert!(xml.contains("&amp; more"));
    }

    #[test]
    fn test_read_back() {
        let xml = to_metalink(&queue()).expect("render"); // test: known-good queue
        let info = get_info(&xml).expect("parse"); // test: own output

        assert_eq!(info.len(), 3);
        let bash = &info["bash"];
        assert_eq!(bash.filename, "bash-5.2-1-x86_64.pkg.tar.zst");
        assert_eq!(bash.size, Some(1_843_200));
        assert_eq!(bash.description.as_deref(), Some("The GNU Bourne Again shell & more"));
        assert_eq!(bash.hashes.get("md5").map(String::len), Some(32));
        assert_eq!(info["core.db.sig"].urls.len(), 1);
    }

    #[test]
    fn test_signature_files_share_the_url_cap() {
        let mut queue = queue();
        let mirrors: Vec<String> = (0..20).map(|i| format!("https://m{}.example/core", i)).collect();
        queue.dbs[0].urls = mirrors.iter().map(|m| format!("{}/core.db", m)).collect();
        let filename = queue.packages[0].package.filename.clone();
        queue.packages[0].urls = mirrors.iter().map(|m| format!("{}/{}", m, filename)).collect();
        queue.packages[0].wants_sig = true;

        let xml = to_metalink(&queue).expect("render"); // test: known-good queue
        for chunk in xml.split("<file ").skip(1) {
            assert_eq!(chunk.matches("<url>").count(), MAX_URLS, "{}", chunk);
        }
        assert_eq!(xml.matches("<file ").count(), 4);
    }

    #[test]
    fn test_reader_caps_urls() {
        let urls: String = (0..20)
            .map(|i| format!("<url>https://m{}.example/f</url>", i))
            .collect();
        let xml = format!(
            r#"<metalink xmlns="{}"><file name="f"><identity>f</identity>{}</file></metalink>"#,
            METALINK_NS, urls
        );
        let info = get_info(&xml).expect("parse"); // test: well-formed input
        assert_eq!(info["f"].urls.len(), MAX_URLS);
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            get_info("<metalink><file></file></metalink>"),
            Err(PlannerError::Metalink(_))
        ));
    }
}
