//! Flat executable image format.
//!
//! Big-endian layout:
//!
//! ```text
//! magic "UPRG" | entry u32 | section count u16
//! per section: name len u16 | name | first vpn u32 | pages u32 | flags u8 | data len u32 | data
//! ```
//!
//! Section bytes past `data len` are zero when loaded.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    constants::memory::PAGE_SIZE,
    filesys::{read_to_end, OpenFile},
    memory::physical::PhysicalMemory,
    processes::{
        coff::{CoffSection, Executable, ExecutableFormat},
        loader::LoadError,
    },
};

pub const IMAGE_MAGIC: &[u8; 4] = b"UPRG";
const FLAG_READ_ONLY: u8 = 1 << 0;
const HEADER_SIZE: usize = 4 + 4 + 2;

/// Builds image files.
pub struct ImageWriter {
    buf: BytesMut,
    sections: u16,
}

impl ImageWriter {
    pub fn new(entry_point: u32) -> Self {
        let mut buf = BytesMut::with_capacity(PAGE_SIZE);
        buf.put_slice(IMAGE_MAGIC);
        buf.put_u32(entry_point);
        buf.put_u16(0);
        Self { buf, sections: 0 }
    }

    /// Appends a section.
    ///
    /// # Panics
    ///
    /// Panics if `name` is longer than `u16::MAX` bytes, if `data` is longer
    /// than `u32::MAX` bytes, or if the image already holds `u16::MAX`
    /// sections.
    pub fn section(
        mut self,
        name: &str,
        first_vpn: u32,
        pages: u32,
        read_only: bool,
        data: &[u8],
    ) -> Self {
        let name_len = u16::try_from(name.len())
            .unwrap_or_else(|_| panic!("section name longer than {} bytes", u16::MAX));
        let data_len = u32::try_from(data.len())
            .unwrap_or_else(|_| panic!("section data longer than {} bytes", u32::MAX));
        self.sections = self
            .sections
            .checked_add(1)
            .unwrap_or_else(|| panic!("more than {} sections", u16::MAX));

        self.buf.put_u16(name_len);
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u32(first_vpn);
        self.buf.put_u32(pages);
        self.buf.put_u8(if read_only { FLAG_READ_ONLY } else { 0 });
        self.buf.put_u32(data_len);
        self.buf.put_slice(data);
        self
    }

    pub fn finish(mut self) -> Bytes {
        self.buf[8..10].copy_from_slice(&self.sections.to_be_bytes());
        self.buf.freeze()
    }
}

struct ImageReader {
    buf: Bytes,
}

impl ImageReader {
    fn need(&self, len: usize) -> Result<(), LoadError> {
        if self.buf.remaining() < len {
            return Err(LoadError::Malformed);
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, LoadError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_u16(&mut self) -> Result<u16, LoadError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn read_u32(&mut self) -> Result<u32, LoadError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes, LoadError> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    fn read_section(&mut self) -> Result<(CoffSection, Bytes), LoadError> {
        let name_len = self.read_u16()? as usize;
        let name = String::from_utf8(self.read_bytes(name_len)?.to_vec())
            .map_err(|_| LoadError::Malformed)?;
        let first_vpn = self.read_u32()? as usize;
        let length = self.read_u32()? as usize;
        let flags = self.read_u8()?;
        let data_len = self.read_u32()? as usize;
        if data_len > length.saturating_mul(PAGE_SIZE) {
            return Err(LoadError::Malformed);
        }
        let data = self.read_bytes(data_len)?;

        let section = CoffSection {
            name,
            first_vpn,
            length,
            read_only: flags & FLAG_READ_ONLY != 0,
        };
        Ok((section, data))
    }
}

/// Decodes a complete image held in memory.
pub fn decode(bytes: Bytes) -> Result<(u32, Vec<(CoffSection, Bytes)>), LoadError> {
    let mut reader = ImageReader { buf: bytes };
    reader.need(HEADER_SIZE)?;
    if reader.read_bytes(IMAGE_MAGIC.len())?.as_ref() != IMAGE_MAGIC {
        return Err(LoadError::Malformed);
    }
    let entry_point = reader.read_u32()?;
    let count = reader.read_u16()?;

    let sections = (0..count)
        .map(|_| reader.read_section())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((entry_point, sections))
}

/// Parser for the flat image format.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatImageFormat;

impl ExecutableFormat for FlatImageFormat {
    fn parse(&self, mut file: Box<dyn OpenFile>) -> Result<Box<dyn Executable>, LoadError> {
        let decoded = read_to_end(file.as_mut())
            .map_err(LoadError::Io)
            .and_then(|contents| decode(Bytes::from(contents)));

        match decoded {
            Ok((entry_point, sections)) => {
                let (sections, data) = sections.into_iter().unzip();
                Ok(Box::new(FlatImage {
                    file,
                    entry_point,
                    sections,
                    data,
                }))
            }
            Err(err) => {
                file.close();
                Err(err)
            }
        }
    }
}

/// A parsed flat image, still holding its file open.
pub struct FlatImage {
    file: Box<dyn OpenFile>,
    entry_point: u32,
    sections: Vec<CoffSection>,
    data: Vec<Bytes>,
}

impl Executable for FlatImage {
    fn sections(&self) -> &[CoffSection] {
        &self.sections
    }

    fn entry_point(&self) -> u32 {
        self.entry_point
    }

    fn load_page(
        &mut self,
        section: usize,
        page: usize,
        ppn: usize,
        memory: &PhysicalMemory,
    ) -> Result<(), LoadError> {
        let info = self.sections.get(section).ok_or(LoadError::Malformed)?;
        if page >= info.length {
            return Err(LoadError::Malformed);
        }

        let data = &self.data[section];
        let start = (page * PAGE_SIZE).min(data.len());
        let end = ((page + 1) * PAGE_SIZE).min(data.len());

        let mut contents = [0u8; PAGE_SIZE];
        contents[..end - start].copy_from_slice(&data[start..end]);
        if memory.write(ppn * PAGE_SIZE, &contents) != PAGE_SIZE {
            return Err(LoadError::InsufficientMemory);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.file.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::{memory::MemFileSystem, FileSystem};

    fn sample() -> Bytes {
        ImageWriter::new(0x20)
            .section(".text", 0, 1, true, b"\x01\x02\x03\x04")
            .section(".data", 1, 2, false, &[9u8; PAGE_SIZE + 3])
            .finish()
    }

    #[test]
    fn test_decode_sections() {
        let (entry, sections) = decode(sample()).unwrap();
        assert_eq!(entry, 0x20);
        assert_eq!(sections.len(), 2);

        let (text, text_data) = &sections[0];
        assert_eq!(text.name, ".text");
        assert_eq!((text.first_vpn, text.length, text.read_only), (0, 1, true));
        assert_eq!(text_data.as_ref(), b"\x01\x02\x03\x04");

        let (data, bytes) = &sections[1];
        assert_eq!((data.first_vpn, data.length, data.read_only), (1, 2, false));
        assert_eq!(bytes.len(), PAGE_SIZE + 3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(Bytes::from_static(b"nope")).err(), Some(LoadError::Malformed));
        assert_eq!(
            decode(Bytes::from_static(b"XXXX\0\0\0\0\0\0")).err(),
            Some(LoadError::Malformed)
        );

        let truncated = sample().slice(..20);
        assert_eq!(decode(truncated).err(), Some(LoadError::Malformed));
    }

    #[test]
    fn test_decode_rejects_oversized_data() {
        let image = ImageWriter::new(0)
            .section(".text", 0, 1, true, &[0u8; PAGE_SIZE + 1])
            .finish();
        assert_eq!(decode(image).err(), Some(LoadError::Malformed));
    }

    #[test]
    #[should_panic(expected = "section name longer than 65535 bytes")]
    fn test_writer_refuses_long_section_name() {
        let name = "n".repeat(u16::MAX as usize + 1);
        ImageWriter::new(0).section(&name, 0, 1, false, b"");
    }

    #[test]
    fn test_writer_accepts_longest_section_name() {
        let name = "n".repeat(u16::MAX as usize);
        let image = ImageWriter::new(0).section(&name, 0, 1, false, b"").finish();
        let (_, sections) = decode(image).unwrap();
        assert_eq!(sections[0].0.name.len(), u16::MAX as usize);
    }

    #[test]
    #[should_panic(expected = "more than 65535 sections")]
    fn test_writer_refuses_too_many_sections() {
        let mut writer = ImageWriter::new(0);
        for vpn in 0..=u32::from(u16::MAX) {
            writer = writer.section("", vpn, 1, false, b"");
        }
        writer.finish();
    }

    #[test]
    fn test_load_page_zero_fills() {
        let fs = MemFileSystem::new();
        fs.insert("prog.coff", &sample());
        let file = fs.open("prog.coff", false).unwrap();
        let mut image = FlatImageFormat.parse(file).unwrap();
        assert_eq!(image.entry_point(), 0x20);

        let memory = PhysicalMemory::new(4);
        memory.write(3 * PAGE_SIZE, &[0xEE; PAGE_SIZE]);
        image.load_page(1, 1, 3, &memory).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        memory.read(3 * PAGE_SIZE, &mut page);
        assert_eq!(&page[..3], &[9, 9, 9]);
        assert!(page[3..].iter().all(|&b| b == 0));

        assert_eq!(image.load_page(1, 2, 0, &memory).err(), Some(LoadError::Malformed));
        assert_eq!(image.load_page(5, 0, 0, &memory).err(), Some(LoadError::Malformed));
        image.close();
    }

    #[test]
    fn test_parse_failure_reported() {
        let fs = MemFileSystem::new();
        fs.insert("bad.coff", b"not an image");
        let file = fs.open("bad.coff", false).unwrap();
        assert_eq!(FlatImageFormat.parse(file).err(), Some(LoadError::Malformed));
    }
}
