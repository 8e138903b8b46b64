//! Structured file I/O for binary data serialization.
//!
//! Every persisted structure (the sorted value index, the symbol table
//! snapshot) is written as a stream of big-endian fixed-width integers,
//! varints and length-prefixed byte strings, followed by a crc32 trailer over
//! everything written before it.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, XmldexError};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint::{MAX_VARINT_LEN, decode_u64, encode_u64};

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.update_checksum(&[value]);
        Ok(())
    }

    /// Write a u16 value (big-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<BigEndian>(value)?;
        self.update_checksum(&value.to_be_bytes());
        Ok(())
    }

    /// Write a u32 value (big-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<BigEndian>(value)?;
        self.update_checksum(&value.to_be_bytes());
        Ok(())
    }

    /// Write a u64 value (big-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<BigEndian>(value)?;
        self.update_checksum(&value.to_be_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.writer.write_all(&encoded)?;
        self.update_checksum(&encoded);
        Ok(())
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.update_checksum(value);
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the checksum of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn update_checksum(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the checksum trailer, then flush and close the writer.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.checksum();
        self.writer.write_u32::<BigEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < 4 {
            return Err(XmldexError::storage("File too short for checksum"));
        }

        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_available(1)?;
        let value = self.reader.read_u8()?;
        self.update_checksum(&[value]);
        Ok(value)
    }

    /// Read a u16 value (big-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure_available(2)?;
        let value = self.reader.read_u16::<BigEndian>()?;
        self.update_checksum(&value.to_be_bytes());
        Ok(value)
    }

    /// Read a u32 value (big-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_available(4)?;
        let value = self.reader.read_u32::<BigEndian>()?;
        self.update_checksum(&value.to_be_bytes());
        Ok(value)
    }

    /// Read a u64 value (big-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure_available(8)?;
        let value = self.reader.read_u64::<BigEndian>()?;
        self.update_checksum(&value.to_be_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
        loop {
            if bytes.len() == MAX_VARINT_LEN {
                return Err(XmldexError::storage("VarInt too long"));
            }
            self.ensure_available(bytes.len() as u64 + 1)?;
            let byte = self.reader.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        let (value, _) = decode_u64(&bytes)?;
        self.update_checksum(&bytes);
        Ok(value)
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| XmldexError::storage(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()?;
        self.read_raw(length as usize)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        self.ensure_available(length as u64)?;
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.update_checksum(&bytes);
        Ok(bytes)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Check if only the checksum trailer is left.
    pub fn is_eof(&self) -> bool {
        self.position >= self.file_size.saturating_sub(4)
    }

    /// Get the checksum of everything read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn update_checksum(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    // Reads must never run into the trailer, so a corrupt length prefix fails
    // here instead of allocating a huge buffer.
    fn ensure_available(&self, needed: u64) -> Result<()> {
        let payload_end = self.file_size - 4;
        if self.position + needed > payload_end {
            return Err(XmldexError::storage(format!(
                "Unexpected end of data: need {needed} bytes at offset {} of {payload_end}",
                self.position
            )));
        }
        Ok(())
    }

    /// Verify file integrity by checking the trailing checksum.
    ///
    /// Must be called once the whole payload has been read.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        if self.position + 4 != self.file_size {
            return Err(XmldexError::storage(format!(
                "{} trailing bytes before checksum",
                self.file_size - 4 - self.position
            )));
        }

        let stored_checksum = self.reader.read_u32::<BigEndian>()?;
        Ok(stored_checksum == self.checksum())
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_struct_writer_reader() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("test.struct").unwrap();
            let mut writer = StructWriter::new(output);

            writer.write_u8(42).unwrap();
            writer.write_u16(1234).unwrap();
            writer.write_u32(5678).unwrap();
            writer.write_u64(9876543210).unwrap();
            writer.write_varint(12345).unwrap();
            writer.write_string("{urn:x}item").unwrap();
            writer.write_bytes(b"\x00\x01\x00\x02").unwrap();
            assert_eq!(writer.position(), 1 + 2 + 4 + 8 + 2 + 12 + 5);

            writer.close().unwrap();
        }

        let input = storage.open_input("test.struct").unwrap();
        let mut reader = StructReader::new(input).unwrap();

        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u16().unwrap(), 1234);
        assert_eq!(reader.read_u32().unwrap(), 5678);
        assert_eq!(reader.read_u64().unwrap(), 9876543210);
        assert_eq!(reader.read_varint().unwrap(), 12345);
        assert_eq!(reader.read_string().unwrap(), "{urn:x}item");
        assert_eq!(reader.read_bytes().unwrap(), b"\x00\x01\x00\x02");
        assert!(reader.is_eof());
        assert!(reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_big_endian_layout() {
        let storage = MemoryStorage::new_default();
        {
            let mut writer = StructWriter::new(storage.create_output("be").unwrap());
            writer.write_u16(0x0102).unwrap();
            writer.close().unwrap();
        }

        let bytes = crate::storage::read_all(&storage, "be").unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x02]);
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let storage = MemoryStorage::new_default();
        {
            let mut writer = StructWriter::new(storage.create_output("c").unwrap());
            writer.write_u32(7).unwrap();
            writer.write_bytes(b"payload").unwrap();
            writer.close().unwrap();
        }

        let mut bytes = crate::storage::read_all(&storage, "c").unwrap();
        bytes[6] ^= 0xFF;
        storage.corrupt_file("c", &bytes);

        let mut reader = StructReader::new(storage.open_input("c").unwrap()).unwrap();
        reader.read_u32().unwrap();
        reader.read_bytes().unwrap();
        assert!(!reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_length_prefix_past_end_is_rejected() {
        let storage = MemoryStorage::new_default();
        {
            let mut writer = StructWriter::new(storage.create_output("short").unwrap());
            writer.write_varint(1_000_000).unwrap();
            writer.close().unwrap();
        }

        let mut reader = StructReader::new(storage.open_input("short").unwrap()).unwrap();
        assert!(reader.read_bytes().is_err());
    }
}
