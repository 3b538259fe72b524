//! ZIP package helpers for in-memory Office Open XML documents.
//! The whole package is held as an ordered list of parts so any part can be
//! replaced and the package written back without touching the others.

use crate::error::SheetMarkerError;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

/// One file inside the package.
#[derive(Clone, Debug)]
pub(crate) struct Part {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
}

/// All parts of a package in their original order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Package {
    parts: Vec<Part>,
}

impl Package {
    /// Reads every entry of a ZIP byte stream.
    pub(crate) fn read(bytes: &[u8]) -> Result<Package, SheetMarkerError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            parts.push(Part { name: file.name().to_owned(), data });
        }
        Ok(Package { parts })
    }

    /// Writes the parts back to a deflated ZIP byte stream.
    pub(crate) fn write(&self) -> Result<Vec<u8>, SheetMarkerError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            writer.start_file(part.name.as_str(), options)?;
            writer.write_all(&part.data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Finds a part by name, case-insensitive and path separator agnostic.
    pub(crate) fn get(&self, name: &str) -> Option<&Part> {
        let pattern = normalize(name);
        self.parts.iter().find(|part| normalize(&part.name).eq_ignore_ascii_case(&pattern))
    }

    /// Replaces the content of an existing part, or appends a new one.
    pub(crate) fn put(&mut self, name: &str, data: Vec<u8>) {
        let pattern = normalize(name);
        match self.parts.iter_mut().find(|part| normalize(&part.name).eq_ignore_ascii_case(&pattern)) {
            Some(part) => part.data = data,
            None => self.parts.push(Part { name: pattern, data }),
        }
    }

    /// Removes a part; returns whether it existed.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let pattern = normalize(name);
        let before = self.parts.len();
        self.parts.retain(|part| !normalize(&part.name).eq_ignore_ascii_case(&pattern));
        before != self.parts.len()
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_owned()
}
