//! Minimal `.docx` writer: one paragraph per text line, a page break between OCR pages.

use crate::error::{Error, Result};
use crate::export::unique_path;
use crate::types::SourceFile;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn xml_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Xml(e.to_string())
}

fn write_paragraph<W: Write>(writer: &mut Writer<W>, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("w:p"))).map_err(xml_err)?;
    if !text.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("w:r"))).map_err(xml_err)?;
        writer
            .write_event(Event::Start(
                BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
            ))
            .map_err(xml_err)?;
        writer.write_event(Event::Text(BytesText::new(text))).map_err(xml_err)?;
        writer.write_event(Event::End(BytesEnd::new("w:t"))).map_err(xml_err)?;
        writer.write_event(Event::End(BytesEnd::new("w:r"))).map_err(xml_err)?;
    }
    writer.write_event(Event::End(BytesEnd::new("w:p"))).map_err(xml_err)?;
    Ok(())
}

fn write_page_break<W: Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("w:p"))).map_err(xml_err)?;
    writer.write_event(Event::Start(BytesStart::new("w:r"))).map_err(xml_err)?;
    writer
        .write_event(Event::Empty(BytesStart::new("w:br").with_attributes([("w:type", "page")])))
        .map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("w:r"))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("w:p"))).map_err(xml_err)?;
    Ok(())
}

/// `word/document.xml` for the given pages.
pub fn document_xml(pages: &[String]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("w:document").with_attributes([("xmlns:w", WORD_NS)]),
        ))
        .map_err(xml_err)?;
    writer.write_event(Event::Start(BytesStart::new("w:body"))).map_err(xml_err)?;
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            write_page_break(&mut writer)?;
        }
        for line in page.lines() {
            write_paragraph(&mut writer, line)?;
        }
    }
    writer.write_event(Event::Empty(BytesStart::new("w:sectPr"))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("w:body"))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("w:document"))).map_err(xml_err)?;
    Ok(writer.into_inner())
}

/// Package the pages as a `.docx` in memory.
pub fn build_docx(pages: &[String]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("[Content_Types].xml", opts)?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;
    zip.start_file("_rels/.rels", opts)?;
    zip.write_all(ROOT_RELS.as_bytes())?;
    zip.start_file("word/document.xml", opts)?;
    zip.write_all(&document_xml(pages)?)?;
    Ok(zip.finish()?.into_inner())
}

/// One `.docx` per file.
pub fn export_word(files: &[SourceFile], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let pages: Vec<String> = file.pages().iter().map(|p| p.display_text()).collect();
        let path = unique_path(dir, file.stem(), "docx");
        std::fs::write(&path, build_docx(&pages)?)?;
        tracing::info!(path = %path.display(), "word exported");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn document_escapes_text_and_breaks_pages() {
        let xml = document_xml(&["a < b & c".to_string(), "page two".to_string()]).unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("a &lt; b &amp; c"));
        assert!(xml.contains(r#"<w:br w:type="page"/>"#));
        assert!(xml.contains("page two"));
        assert_eq!(xml.matches("<w:br").count(), 1);
    }

    #[test]
    fn docx_is_a_readable_zip() {
        let bytes = build_docx(&["สวัสดี".to_string()]).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut doc = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut doc)
            .unwrap();
        assert!(doc.contains("สวัสดี"));
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        assert!(archive.by_name("_rels/.rels").is_ok());
    }
}
