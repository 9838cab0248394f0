use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

const BOM: char = '\u{feff}';

/// Reads a style file as text, dropping a leading byte order mark.
pub fn read_source<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    if text.starts_with(BOM) {
        text.drain(..BOM.len_utf8());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.css");
        fs::write(&path, "\u{feff}.a { color: red; }").unwrap();
        assert_eq!(read_source(&path).unwrap(), ".a { color: red; }");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_source("/definitely/not/here.css").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
