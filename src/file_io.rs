//! File handles exposed to the language via `fopen`/`fread`/…

use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read as IoRead, Write as IoWrite};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

impl FileMode {
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'r' => Ok(FileMode::Read),
            'w' => Ok(FileMode::Write),
            'a' => Ok(FileMode::Append),
            _ => Err(Error::invalid_expression(format!("unknown file mode '{c}'"))),
        }
    }

    pub fn to_char(self) -> char {
        match self {
            FileMode::Read => 'r',
            FileMode::Write => 'w',
            FileMode::Append => 'a',
        }
    }
}

/// A file handle. `clone` on a `Value::File` is rejected at the value layer;
/// this struct itself isn't `Clone` to make that a compile-time guarantee.
#[derive(Debug)]
pub struct FileHandle {
    filename: String,
    mode: FileMode,
    reader: Option<BufReader<std::fs::File>>,
    writer: Option<std::fs::File>,
}

impl FileHandle {
    pub fn open(filename: String, mode: FileMode) -> Result<Self> {
        let open_err = |e: std::io::Error| Error::FileIOError(format!("{filename}: {e}"));
        let (reader, writer) = match mode {
            FileMode::Read => {
                let f = OpenOptions::new().read(true).open(&filename).map_err(open_err)?;
                (Some(BufReader::new(f)), None)
            }
            FileMode::Write => {
                let f = OpenOptions::new().write(true).create(true).truncate(true).open(&filename).map_err(open_err)?;
                (None, Some(f))
            }
            FileMode::Append => {
                let f = OpenOptions::new().append(true).create(true).open(&filename).map_err(open_err)?;
                (None, Some(f))
            }
        };
        Ok(FileHandle { filename, mode, reader, writer })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some() || self.writer.is_some()
    }

    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush().map_err(|e| Error::FileIOError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn read(&mut self) -> Result<Option<char>> {
        let r = self.reader.as_mut().ok_or_else(|| Error::FileIOError(format!("{}: not open for reading", self.filename)))?;
        let mut buf = [0u8; 1];
        match r.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0] as char)),
            Err(e) => Err(Error::FileIOError(e.to_string())),
        }
    }

    pub fn readln(&mut self) -> Result<Option<String>> {
        let r = self.reader.as_mut().ok_or_else(|| Error::FileIOError(format!("{}: not open for reading", self.filename)))?;
        let mut line = String::new();
        match r.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Ok(Some(line))
            }
            Err(e) => Err(Error::FileIOError(e.to_string())),
        }
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        let w = self.writer.as_mut().ok_or_else(|| Error::FileIOError(format!("{}: not open for writing", self.filename)))?;
        w.write_all(s.as_bytes()).map_err(|e| Error::FileIOError(e.to_string()))
    }

    pub fn writeln_str(&mut self, s: &str) -> Result<()> {
        self.write_str(s)?;
        self.write_str("\n")
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename && self.mode == other.mode
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File:{}", self.filename)
    }
}
