//! XML utilities for SpreadsheetML parts.
//! Provides a pull reader wrapper, attribute helpers and a streaming rewriter
//! that copies a part event by event while letting the caller replace elements.

use crate::error::SheetMarkerError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use quick_xml::Writer;
use std::borrow::Cow;
use std::io::BufRead;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),
}

/// XML reader wrapper configured for SpreadsheetML parsing
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    /// Creates a reader that reports `<a/>` as a start/end pair.
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        let buffer = Vec::with_capacity(1024);
        XmlReader { reader, buffer }
    }

    /// Reads the next XML event from the reader
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, SheetMarkerError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(SheetMarkerError::XmlError(error)),
        }
    }
}

/// Helper trait for XML nodes providing attribute access methods
pub(crate) trait XmlNodeHelper<'a> {
    /// Gets an unescaped attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetMarkerError>;

    /// Collects every attribute except the listed ones, in document order
    fn attributes_except(&self, excluded: &[&str]) -> Result<Vec<(String, String)>, SheetMarkerError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetMarkerError> {
        Ok(self.try_get_attribute(name)?
            .map(|attribute| attribute.unescape_value())
            .transpose()?)
    }

    fn attributes_except(&self, excluded: &[&str]) -> Result<Vec<(String, String)>, SheetMarkerError> {
        let mut attributes = Vec::new();
        for result in self.attributes() {
            let attribute = result?;
            let key = std::str::from_utf8(attribute.key.as_ref())?.to_owned();
            if !excluded.contains(&key.as_str()) {
                attributes.push((key, attribute.unescape_value()?.into_owned()));
            }
        }
        Ok(attributes)
    }
}

/// Helper trait for building text content from XML events
pub(crate) trait XmlTextContextHelper {
    /// Appends text content from BytesRef event (handles entities and character references)
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetMarkerError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetMarkerError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = if let Some(hex) = number.strip_prefix('x') {
                u32::from_str_radix(hex, 16)?
            } else {
                number.parse::<u32>()?
            };
            if let Some(character) = std::char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }
        Ok(())
    }
}

/// Namespace prefix of a qualified element name, including the colon (`"x:"`).
pub(crate) fn name_prefix(name: &[u8]) -> String {
    match name.iter().position(|byte| *byte == b':') {
        Some(index) => format!("{}:", String::from_utf8_lossy(&name[..index])),
        None => String::new(),
    }
}

/// What a rewrite callback decided for the current event.
pub(crate) enum Rewrite {
    /// Copy the event to the output unchanged.
    Keep,
    /// Drop the event; a start tag drops its whole subtree.
    Skip,
}

/// Copies `xml` event by event, asking `edit` about every event outside a skipped subtree.
///
/// The callback may write replacement events to the writer before answering.
pub(crate) fn rewrite_xml<F>(xml: &[u8], mut edit: F) -> Result<Vec<u8>, SheetMarkerError>
where
    F: FnMut(&Event<'_>, &mut Writer<Vec<u8>>) -> Result<Rewrite, SheetMarkerError>,
{
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buffer = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        buffer.clear();
        match reader.read_event_into(&mut buffer)? {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            _ if skip_depth > 0 => (),
            event => match edit(&event, &mut writer)? {
                Rewrite::Keep => writer.write_event(event)?,
                Rewrite::Skip => {
                    if matches!(event, Event::Start(_)) {
                        skip_depth = 1;
                    }
                }
            },
        }
    }
    Ok(writer.into_inner())
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}
