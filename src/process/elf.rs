//! Format of an ELF executable file
//!
//! Both headers are decoded field by field from little-endian bytes,
//! the layout is the one of the riscv64 target.

use crate::fs::InodeData;
use super::ExecError;

/// "\x7FELF" in little endian
pub const ELF_MAGIC: u32 = 0x464C457F;

/// Values for ProgHeader type
pub const ELF_PROG_LOAD: u32 = 1;

pub const ELF_HEADER_SIZE: usize = 64;
pub const PROG_HEADER_SIZE: usize = 56;

bitflags! {
    /// Flag bits for ProgHeader flags.
    /// They are decoded, but every user page gets R|W|X anyway.
    pub struct ProgFlag: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// File header
#[derive(Clone, Copy, Debug)]
pub struct ElfHeader {
    /// must equal ELF_MAGIC
    pub magic: u32,
    pub elf: [u8; 12],
    pub elf_type: u16,
    pub machine: u16,
    pub version: u32,
    /// initial program counter
    pub entry: u64,
    /// offset of program headers
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    /// size of one program header entry
    pub phentsize: u16,
    /// number of program headers
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl ElfHeader {
    pub fn from_bytes(buf: &[u8; ELF_HEADER_SIZE]) -> Self {
        let mut elf = [0u8; 12];
        elf.copy_from_slice(&buf[4..16]);
        Self {
            magic: u32_at(buf, 0),
            elf,
            elf_type: u16_at(buf, 16),
            machine: u16_at(buf, 18),
            version: u32_at(buf, 20),
            entry: u64_at(buf, 24),
            phoff: u64_at(buf, 32),
            shoff: u64_at(buf, 40),
            flags: u32_at(buf, 48),
            ehsize: u16_at(buf, 52),
            phentsize: u16_at(buf, 54),
            phnum: u16_at(buf, 56),
            shentsize: u16_at(buf, 58),
            shnum: u16_at(buf, 60),
            shstrndx: u16_at(buf, 62),
        }
    }
}

/// Program section header
#[derive(Clone, Copy, Debug)]
pub struct ProgHeader {
    pub pg_type: u32,
    pub flags: ProgFlag,
    /// offset of the segment in the file
    pub off: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl ProgHeader {
    pub fn from_bytes(buf: &[u8; PROG_HEADER_SIZE]) -> Self {
        Self {
            pg_type: u32_at(buf, 0),
            flags: ProgFlag::from_bits_truncate(u32_at(buf, 4)),
            off: u64_at(buf, 8),
            vaddr: u64_at(buf, 16),
            paddr: u64_at(buf, 24),
            filesz: u64_at(buf, 32),
            memsz: u64_at(buf, 40),
            align: u64_at(buf, 48),
        }
    }

    /// Read the program header at offset of the locked inode.
    pub fn read(idata: &mut InodeData, offset: u32) -> Result<Self, ExecError> {
        let mut buf = [0u8; PROG_HEADER_SIZE];
        idata.read(&mut buf, offset)
            .map_err(|_| ExecError::Io("cannot read elf program header"))?;
        Ok(Self::from_bytes(&buf))
    }
}

/// Read and check the elf header at the start of the locked inode.
pub fn read_header(idata: &mut InodeData) -> Result<ElfHeader, ExecError> {
    let mut buf = [0u8; ELF_HEADER_SIZE];
    idata.read(&mut buf, 0)
        .map_err(|_| ExecError::Io("cannot read elf header"))?;
    let elf = ElfHeader::from_bytes(&buf);
    if elf.magic != ELF_MAGIC {
        return Err(ExecError::Format)
    }
    Ok(elf)
}

#[inline]
fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn u32_at(buf: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}


#[cfg(test)]
mod tests {
    use super::build::ElfBuilder;
    use super::*;
    use crate::fs::InodeCache;

    #[test]
    fn decode_headers() {
        let file = ElfBuilder::new(0x1234)
            .load(0x1000, &[7u8; 16], 0x20)
            .build();

        let mut buf = [0u8; ELF_HEADER_SIZE];
        buf.copy_from_slice(&file[..ELF_HEADER_SIZE]);
        let elf = ElfHeader::from_bytes(&buf);
        assert_eq!(elf.magic, ELF_MAGIC);
        assert_eq!(elf.entry, 0x1234);
        assert_eq!(elf.phoff, ELF_HEADER_SIZE as u64);
        assert_eq!(elf.phentsize as usize, PROG_HEADER_SIZE);
        assert_eq!(elf.phnum, 1);

        let mut buf = [0u8; PROG_HEADER_SIZE];
        buf.copy_from_slice(&file[ELF_HEADER_SIZE..ELF_HEADER_SIZE + PROG_HEADER_SIZE]);
        let ph = ProgHeader::from_bytes(&buf);
        assert_eq!(ph.pg_type, ELF_PROG_LOAD);
        assert_eq!(ph.flags, ProgFlag::READ | ProgFlag::EXEC);
        assert_eq!(ph.off, (ELF_HEADER_SIZE + PROG_HEADER_SIZE) as u64);
        assert_eq!(ph.vaddr, 0x1000);
        assert_eq!(ph.filesz, 16);
        assert_eq!(ph.memsz, 0x20);
    }

    #[test]
    fn header_checks() {
        let icache = InodeCache::new();
        let mut file = ElfBuilder::new(0).build();
        icache.create(b"/good", &file).unwrap();
        file[0] = 0;
        icache.create(b"/bad", &file).unwrap();
        icache.create(b"/short", &file[..10]).unwrap();

        let ip = icache.namei(b"/good").unwrap();
        assert!(read_header(&mut ip.lock()).is_ok());

        let ip = icache.namei(b"/bad").unwrap();
        assert_eq!(read_header(&mut ip.lock()).unwrap_err(), ExecError::Format);

        let ip = icache.namei(b"/short").unwrap();
        assert!(matches!(read_header(&mut ip.lock()), Err(ExecError::Io(_))));
    }
}
