//! Minimal CBF (crystallographic binary file) container writer.
//!
//! Implements just the surface a miniCBF emitter needs: a
//! datablock/category/column builder driven in document order, text values,
//! one byte-offset-compressed integer array per file, and a writer producing
//! the CBF 1.5 text layout with a MIME-framed base64 binary section.
//!
//! Categories holding a single row are written in key/value form
//! (`_category.column value`), which is the only form miniCBF consumers
//! expect.

mod byte_offset;

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};

use crate::{Error, Result};

/// Compression scheme for a binary array column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryCompression {
    ByteOffset,
}

/// Element byte order of a binary array column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
}

impl ByteOrder {
    fn header_token(self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "LITTLE_ENDIAN",
        }
    }
}

/// File write options, mirroring the flag word of the C container library.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Emit MIME headers around the binary section.
    pub mime_headers: bool,
    /// Emit a Content-MD5 digest of the compressed binary data.
    pub digest: bool,
    /// Pad the binary section to discourage short reads by memory-mapped
    /// consumers.
    pub pad_4k: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            mime_headers: true,
            digest: true,
            pad_4k: true,
        }
    }
}

const PAD_4K: usize = 4095;
const BASE64_LINE: usize = 76;
const BOUNDARY: &str = "--CIF-BINARY-FORMAT-SECTION--";

#[derive(Debug)]
struct BinarySection {
    id: i64,
    /// Byte-offset-compressed element stream.
    data: Vec<u8>,
    element_size: usize,
    signed: bool,
    n_elements: usize,
    byte_order: ByteOrder,
    dim_fast: usize,
    dim_mid: usize,
    padding: usize,
}

#[derive(Debug)]
enum Value {
    Text(String),
    Binary(BinarySection),
}

#[derive(Debug)]
struct Column {
    name: String,
    value: Option<Value>,
}

#[derive(Debug)]
struct Category {
    name: String,
    columns: Vec<Column>,
}

#[derive(Debug)]
struct DataBlock {
    name: String,
    categories: Vec<Category>,
}

/// An in-memory CBF document under construction.
///
/// The builder methods track a current datablock, category, and column:
/// `new_*` appends (or re-enters, for categories) and makes the new node
/// current; `set_*` attaches a value to the current column.
#[derive(Debug, Default)]
pub struct Cbf {
    blocks: Vec<DataBlock>,
}

impl Cbf {
    #[must_use]
    pub fn new() -> Self {
        Cbf::default()
    }

    /// Append a datablock and make it current.
    pub fn new_datablock(&mut self, name: &str) {
        self.blocks.push(DataBlock {
            name: name.to_string(),
            categories: Vec::new(),
        });
    }

    /// Append a category to the current datablock, or re-enter an existing
    /// category of the same name, and make it current.
    ///
    /// # Errors
    /// [`Error::Emit`] when no datablock exists yet.
    pub fn new_category(&mut self, name: &str) -> Result<()> {
        let block = self
            .blocks
            .last_mut()
            .ok_or_else(|| Error::Emit("new_category before any datablock".into()))?;
        if let Some(pos) = block.categories.iter().position(|c| c.name == name) {
            // Re-entering an existing category moves it to the current slot.
            let cat = block.categories.remove(pos);
            block.categories.push(cat);
        } else {
            block.categories.push(Category {
                name: name.to_string(),
                columns: Vec::new(),
            });
        }
        Ok(())
    }

    /// Append a column to the current category and make it current.
    ///
    /// # Errors
    /// [`Error::Emit`] when no category exists yet.
    pub fn new_column(&mut self, name: &str) -> Result<()> {
        let cat = self
            .current_category()
            .ok_or_else(|| Error::Emit("new_column before any category".into()))?;
        cat.columns.push(Column {
            name: name.to_string(),
            value: None,
        });
        Ok(())
    }

    /// Set a text value on the current column.
    ///
    /// # Errors
    /// [`Error::Emit`] when no column exists yet.
    pub fn set_value(&mut self, text: &str) -> Result<()> {
        let col = self
            .current_column()
            .ok_or_else(|| Error::Emit("set_value before any column".into()))?;
        col.value = Some(Value::Text(text.to_string()));
        Ok(())
    }

    /// Compress `data` (raw elements, native layout per `byte_order`) with
    /// the given scheme and attach it to the current column.
    ///
    /// `data` must hold exactly `n_elements * element_size` bytes. Only
    /// signed 4-byte little-endian elements are supported, which is the one
    /// shape the emitter produces.
    ///
    /// # Errors
    /// [`Error::Emit`] on an unsupported element shape, a length mismatch,
    /// or when no column exists yet.
    #[allow(clippy::too_many_arguments)]
    pub fn set_integer_array(
        &mut self,
        compression: BinaryCompression,
        binary_id: i64,
        data: &[u8],
        element_size: usize,
        signed: bool,
        n_elements: usize,
        byte_order: ByteOrder,
        dim_fast: usize,
        dim_mid: usize,
        _dim_slow: usize,
        padding: usize,
    ) -> Result<()> {
        debug_assert_eq!(compression, BinaryCompression::ByteOffset);
        if element_size != 4 || !signed {
            return Err(Error::Emit(format!(
                "only signed 4-byte elements are supported, got element_size={element_size} signed={signed}"
            )));
        }
        if data.len() != n_elements * element_size {
            return Err(Error::Emit(format!(
                "integer array holds {} bytes, expected {n_elements} x {element_size}",
                data.len()
            )));
        }

        let values: Vec<i32> = data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let encoded = byte_offset::encode(&values);

        let col = self
            .current_column()
            .ok_or_else(|| Error::Emit("set_integer_array before any column".into()))?;
        col.value = Some(Value::Binary(BinarySection {
            id: binary_id,
            data: encoded,
            element_size,
            signed,
            n_elements,
            byte_order,
            dim_fast,
            dim_mid,
            padding,
        }));
        Ok(())
    }

    /// Serialize the document to `out`, consuming the writer (the handle is
    /// closed when this returns).
    ///
    /// # Errors
    /// [`Error::Io`] on write failure.
    pub fn write_file<W: Write>(&self, mut out: W, opts: &WriteOptions) -> Result<()> {
        writeln!(out, "###CBF: VERSION 1.5")?;
        writeln!(out, "# CBF file written by eigerstream")?;
        for block in &self.blocks {
            writeln!(out)?;
            writeln!(out, "data_{}", block.name)?;
            for cat in &block.categories {
                for col in &cat.columns {
                    writeln!(out)?;
                    match &col.value {
                        Some(Value::Text(text)) => {
                            Self::write_text_value(&mut out, &cat.name, &col.name, text)?;
                        }
                        Some(Value::Binary(bin)) => {
                            writeln!(out, "_{}.{}", cat.name, col.name)?;
                            Self::write_binary_value(&mut out, bin, opts)?;
                        }
                        None => {
                            writeln!(out, "_{}.{} ?", cat.name, col.name)?;
                        }
                    }
                }
            }
        }
        out.flush()?;
        Ok(())
    }

    fn write_text_value<W: Write>(
        out: &mut W,
        category: &str,
        column: &str,
        text: &str,
    ) -> Result<()> {
        if text.contains('\n') {
            // Multiline values use the semicolon text-field form.
            writeln!(out, "_{category}.{column}")?;
            writeln!(out, ";{text}")?;
            writeln!(out, ";")?;
        } else {
            writeln!(out, "_{category}.{column} \"{text}\"")?;
        }
        Ok(())
    }

    fn write_binary_value<W: Write>(
        out: &mut W,
        bin: &BinarySection,
        opts: &WriteOptions,
    ) -> Result<()> {
        writeln!(out, ";")?;
        writeln!(out, "{BOUNDARY}")?;
        if opts.mime_headers {
            writeln!(out, "Content-Type: application/octet-stream;")?;
            writeln!(out, "     conversions=\"x-CBF_BYTE_OFFSET\"")?;
            writeln!(out, "Content-Transfer-Encoding: BASE64")?;
            writeln!(out, "X-Binary-Size: {}", bin.data.len())?;
            writeln!(out, "X-Binary-ID: {}", bin.id)?;
            let signedness = if bin.signed { "signed" } else { "unsigned" };
            writeln!(
                out,
                "X-Binary-Element-Type: \"{signedness} {}-bit integer\"",
                bin.element_size * 8
            )?;
            writeln!(
                out,
                "X-Binary-Element-Byte-Order: {}",
                bin.byte_order.header_token()
            )?;
            if opts.digest {
                let digest = Md5::digest(&bin.data);
                writeln!(out, "Content-MD5: {}", BASE64.encode(digest))?;
            }
            writeln!(out, "X-Binary-Number-of-Elements: {}", bin.n_elements)?;
            writeln!(out, "X-Binary-Size-Fastest-Dimension: {}", bin.dim_fast)?;
            writeln!(out, "X-Binary-Size-Second-Dimension: {}", bin.dim_mid)?;
            let padding = if opts.pad_4k { PAD_4K } else { bin.padding };
            writeln!(out, "X-Binary-Size-Padding: {padding}")?;
        }
        writeln!(out)?;

        let encoded = BASE64.encode(&bin.data);
        for line in encoded.as_bytes().chunks(BASE64_LINE) {
            out.write_all(line)?;
            writeln!(out)?;
        }

        if opts.pad_4k {
            // Trailing pad bytes keep the section a predictable size for
            // consumers that reserve fixed windows.
            let pad = vec![b' '; PAD_4K];
            out.write_all(&pad)?;
            writeln!(out)?;
        }
        writeln!(out, "{BOUNDARY}----")?;
        writeln!(out, ";")?;
        Ok(())
    }

    fn current_category(&mut self) -> Option<&mut Category> {
        self.blocks.last_mut()?.categories.last_mut()
    }

    fn current_column(&mut self) -> Option<&mut Column> {
        self.current_category()?.columns.last_mut()
    }
}
