//! EPUB 3 packaging.
//!
//! Writes `mimetype` (stored, first), `META-INF/container.xml` and an
//! `OEBPS/` directory holding the OPF, the EPUB 3 nav document, an EPUB 2
//! NCX for older readers, a title page, one XHTML file per section, the
//! images, and `webshelf.json`, a JSON copy of the [`Document`] that
//! [`read_manifest`] turns back into the same metadata and sections.

use crate::document::{Document, Section};
use crate::error::PackageError;
use crate::scrapers::html::escape_xml;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipWriter;
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const MANIFEST_NAME: &str = "webshelf.json";

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>\n";

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.5; margin: 0 0.5em; }
h1 { font-size: 1.4em; margin: 1em 0; text-align: center; }
p { margin: 0 0 0.8em 0; }
img { max-width: 100%; height: auto; }
.title-page { text-align: center; margin-top: 3em; }
.title-page .author { font-style: italic; }
.summary { text-align: left; margin-top: 2em; }
.unavailable { font-style: italic; text-align: center; margin-top: 2em; }
.source { font-size: 0.8em; text-align: center; word-break: break-all; }
";

/// Writes a [`Document`] to a file.
pub trait Packager: Send + Sync {
    /// Writes the book to `path` and returns the path written.
    fn package(&self, document: &Document, path: &Path) -> Result<PathBuf, PackageError>;
}

/// EPUB 3 packager with an EPUB 2 NCX.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpubPackager;

impl EpubPackager {
    pub fn new() -> Self {
        Self
    }
}

impl Packager for EpubPackager {
    fn package(&self, document: &Document, path: &Path) -> Result<PathBuf, PackageError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| PackageError::Io { path, source }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        // The target only appears once the archive is complete.
        let partial = path.with_extension("epub.part");
        let file = File::create(&partial).map_err(io_error(&partial))?;
        let result = write_archive(document, file);
        if let Err(e) = result {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, path).map_err(io_error(path))?;

        info!(
            path = %path.display(),
            sections = document.sections.len(),
            images = document.assets.len(),
            "epub written"
        );
        Ok(path.to_path_buf())
    }
}

fn write_archive<W: Write + Seek>(document: &Document, writer: W) -> Result<(), PackageError> {
    let mut zip = ZipWriter::new(writer);

    let stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let deflated = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML)?;

    write_entry(&mut zip, "content.opf", &content_opf(document), deflated)?;
    write_entry(&mut zip, "nav.xhtml", &nav_xhtml(document), deflated)?;
    write_entry(&mut zip, "toc.ncx", &toc_ncx(document), deflated)?;
    write_entry(&mut zip, "style.css", STYLESHEET, deflated)?;
    write_entry(&mut zip, "title.xhtml", &title_xhtml(document), deflated)?;

    for section in &document.sections {
        write_entry(&mut zip, &section.href, &section_xhtml(section), deflated)?;
    }

    for asset in &document.assets {
        let bytes = std::fs::read(&asset.local_path).map_err(|source| PackageError::Io {
            path: asset.local_path.clone(),
            source,
        })?;
        debug!(href = %asset.href, bytes = bytes.len(), "packaging image");
        zip.start_file(format!("{}{}", OEBPS_PREFIX, asset.href), stored)?;
        zip.write_all(&bytes)?;
    }

    let manifest = serde_json::to_string_pretty(document)?;
    write_entry(&mut zip, MANIFEST_NAME, &manifest, deflated)?;

    zip.finish()?;
    Ok(())
}

fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    contents: &str,
    options: SimpleFileOptions,
) -> Result<(), PackageError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, name), options)?;
    zip.write_all(contents.as_bytes())?;
    Ok(())
}

/// Reads the embedded manifest back out of a packaged book.
///
/// Asset `local_path`s are not stored and come back empty.
pub fn read_manifest(path: &Path) -> Result<Document, PackageError> {
    let file = File::open(path).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file)?;
    let entry = archive.by_name(&format!("{}{}", OEBPS_PREFIX, MANIFEST_NAME))?;
    Ok(serde_json::from_reader(entry)?)
}

/// Reads a packaged book and copies its images into `asset_dir`.
///
/// The returned document has every asset's `local_path` set, so it can be
/// packaged again even after the original file is overwritten.
pub fn unpack(path: &Path, asset_dir: &Path) -> Result<Document, PackageError> {
    let file = File::open(path).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file)?;
    let mut document: Document = {
        let entry = archive.by_name(&format!("{}{}", OEBPS_PREFIX, MANIFEST_NAME))?;
        serde_json::from_reader(entry)?
    };

    if !document.assets.is_empty() {
        std::fs::create_dir_all(asset_dir).map_err(|source| PackageError::Io {
            path: asset_dir.to_path_buf(),
            source,
        })?;
    }
    for asset in &mut document.assets {
        let mut entry = archive.by_name(&format!("{}{}", OEBPS_PREFIX, asset.href))?;
        let name = Path::new(&asset.href)
            .file_name()
            .map_or_else(|| PathBuf::from(&asset.id), PathBuf::from);
        let target = asset_dir.join(name);
        let mut out = File::create(&target).map_err(|source| PackageError::Io {
            path: target.clone(),
            source,
        })?;
        std::io::copy(&mut entry, &mut out)?;
        debug!(href = %asset.href, target = %target.display(), "image unpacked");
        asset.local_path = target;
    }

    Ok(document)
}

fn content_opf(document: &Document) -> String {
    let meta = &document.metadata;

    let mut metadata = format!(
        "    <dc:identifier id=\"book-id\">{}</dc:identifier>\n    <dc:title>{}</dc:title>\n    <dc:language>{}</dc:language>\n    <meta property=\"dcterms:modified\">{}</meta>\n    <dc:source>{}</dc:source>\n",
        escape_xml(&meta.identifier),
        escape_xml(&meta.title),
        escape_xml(&meta.language),
        escape_xml(&meta.modified),
        escape_xml(&meta.source_url),
    );
    if let Some(author) = &meta.author {
        metadata.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape_xml(author)));
    }
    if let Some(summary) = &meta.summary {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_xml(summary)
        ));
    }
    for subject in meta.genres.iter().chain(&meta.tags) {
        metadata.push_str(&format!("    <dc:subject>{}</dc:subject>\n", escape_xml(subject)));
    }
    if let Some(cover) = document.cover() {
        metadata.push_str(&format!("    <meta name=\"cover\" content=\"{}\"/>\n", cover.id));
    }

    let mut manifest = String::from(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>
    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>
    <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>
    <item id=\"title-page\" href=\"title.xhtml\" media-type=\"application/xhtml+xml\"/>
    <item id=\"webshelf-manifest\" href=\"webshelf.json\" media-type=\"application/json\"/>
",
    );
    for section in &document.sections {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            section.id, section.href
        ));
    }
    for asset in &document.assets {
        let properties = if asset.cover {
            " properties=\"cover-image\""
        } else {
            ""
        };
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            asset.id,
            escape_xml(&asset.href),
            escape_xml(&asset.media_type),
            properties
        ));
    }

    let mut spine = String::from("    <itemref idref=\"title-page\"/>\n");
    for section in &document.sections {
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", section.id));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#
    )
}

fn nav_xhtml(document: &Document) -> String {
    let mut links = String::new();
    for section in &document.sections {
        links.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            section.href,
            escape_xml(&section.title)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#
    )
}

fn toc_ncx(document: &Document) -> String {
    let mut points = String::new();
    for (i, section) in document.sections.iter().enumerate() {
        points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{href}"/>
    </navPoint>
"#,
            n = i + 1,
            label = escape_xml(&section.title),
            href = section.href
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        uid = escape_xml(&document.metadata.identifier),
        title = escape_xml(&document.metadata.title)
    )
}

fn title_xhtml(document: &Document) -> String {
    let meta = &document.metadata;
    let mut body = String::new();

    if let Some(cover) = document.cover() {
        body.push_str(&format!(
            "    <p><img src=\"{}\" alt=\"Cover\"/></p>\n",
            escape_xml(&cover.href)
        ));
    }
    body.push_str(&format!("    <h1>{}</h1>\n", escape_xml(&meta.title)));
    if let Some(author) = &meta.author {
        body.push_str(&format!("    <p class=\"author\">{}</p>\n", escape_xml(author)));
    }
    if let Some(summary) = &meta.summary {
        body.push_str("    <div class=\"summary\">\n");
        for paragraph in summary.lines().map(str::trim).filter(|l| !l.is_empty()) {
            body.push_str(&format!("      <p>{}</p>\n", escape_xml(paragraph)));
        }
        body.push_str("    </div>\n");
    }

    xhtml_page(
        &meta.title,
        &format!("  <div class=\"title-page\">\n{}  </div>", body),
    )
}

fn section_xhtml(section: &Section) -> String {
    let title = escape_xml(&section.title);
    xhtml_page(&section.title, &format!("  <h1>{}</h1>\n{}", title, section.body))
}

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
{}
</body>
</html>
"#,
        escape_xml(title),
        body
    )
}
