//! Program loading.
//!
//! A program file is a flat byte stream. Every four bytes form one word,
//! most significant byte first. A trailing group of fewer than four bytes
//! still produces a word: the bytes that are present overwrite the high
//! bytes of the packing accumulator and the remaining low bytes keep the
//! values they had in the previous word (zero for a one-word file).

use crate::bitpack::insert_unsigned;
use crate::machine::memory::Word;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const BYTE_BITS: u32 = 8;
const BYTES_PER_WORD: usize = 4;

/// Pack a byte stream into big-endian words.
pub fn pack_words(bytes: &[u8]) -> Vec<Word> {
    let mut words = Vec::with_capacity(bytes.len().div_ceil(BYTES_PER_WORD));
    let mut acc: Word = 0;

    for chunk in bytes.chunks(BYTES_PER_WORD) {
        for (i, &byte) in chunk.iter().enumerate() {
            let lsb = BYTE_BITS * (BYTES_PER_WORD - 1 - i) as u32;
            acc = insert_unsigned(acc, BYTE_BITS, lsb, byte as u32);
        }
        words.push(acc);
    }

    words
}

/// Read a whole program from `reader`.
pub fn read_program<R: Read>(mut reader: R) -> Result<Vec<Word>, LoadError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let trailing = bytes.len() % BYTES_PER_WORD;
    if trailing != 0 {
        warn!(trailing, "program ends with a partial word");
    }

    let words = pack_words(&bytes);
    debug!(bytes = bytes.len(), words = words.len(), "program read");
    Ok(words)
}

/// Load a program file from disk.
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<Vec<Word>, LoadError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| LoadError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_program(std::io::BufReader::new(file))
}

/// Errors that can occur while loading a program.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_big_endian() {
        let bytes = [0xD0, 0x00, 0x00, 0x48, 0x70, 0x00, 0x00, 0x00];
        assert_eq!(pack_words(&bytes), vec![0xD000_0048, 0x7000_0000]);
    }

    #[test]
    fn test_pack_empty() {
        assert!(pack_words(&[]).is_empty());
    }

    #[test]
    fn test_short_first_word_is_zero_filled() {
        assert_eq!(pack_words(&[0xAB, 0xCD]), vec![0xABCD_0000]);
    }

    #[test]
    fn test_short_last_word_keeps_previous_low_bytes() {
        let bytes = [0x11, 0x22, 0x33, 0x44, 0xAA];
        assert_eq!(pack_words(&bytes), vec![0x1122_3344, 0xAA22_3344]);
    }

    #[test]
    fn test_read_program_from_reader() {
        let bytes: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x70, 0x00, 0x00, 0x00];
        assert_eq!(read_program(bytes).unwrap(), vec![0xA000_0000, 0x7000_0000]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_program("/nonexistent/program.um").unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/program.um"));
    }

    #[test]
    fn test_load_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("um-loader-test-{}.um", std::process::id()));
        std::fs::write(&path, [0xD0, 0x00, 0x00, 0x48, 0xA0, 0x00, 0x00, 0x00]).unwrap();

        let words = load_program(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(words, vec![0xD000_0048, 0xA000_0000]);
    }
}
