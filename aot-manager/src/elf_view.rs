//! 最小 ELF 读取面
//!
//! 产物加载只需要定位少数几个节（`.aot` / `.text` / `.aot_got`），
//! 这里按字节解析 ELF 头与节头表并按名字查节，不依赖完整的
//! ELF 解析库。所有读取都做边界检查，越界返回错误而不是崩溃，
//! 因为输入是外部提供的文件。

use thiserror::Error;

/// ELF 解析错误
#[derive(Debug, Error)]
pub enum ElfViewError {
    #[error("Not an ELF image")]
    BadIdent,
    #[error("Unsupported ELF encoding")]
    BadEncoding,
    #[error("Truncated ELF image at offset {0}")]
    Truncated(usize),
    #[error("Missing section: {0}")]
    MissingSection(&'static str),
}

/// 一个节在文件与内存中的位置
#[derive(Debug, Clone, Copy)]
pub struct SectionRange {
    pub offset: usize,
    pub size: usize,
    pub addr: u64,
}

/// 只读 ELF 视图
pub struct ElfView<'a> {
    data: &'a [u8],
    class64: bool,
    shoff: usize,
    shentsize: usize,
    shnum: usize,
    shstrtab: SectionRange,
}

impl<'a> ElfView<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfViewError> {
        if data.len() < 52 || data[0..4] != [0x7F, b'E', b'L', b'F'] {
            return Err(ElfViewError::BadIdent);
        }
        let class64 = match data[4] {
            1 => false,
            2 => true,
            _ => return Err(ElfViewError::BadEncoding),
        };
        if data[5] != 1 {
            // 只支持小端
            return Err(ElfViewError::BadEncoding);
        }
        let (shoff, shentsize_off, shnum_off, shstrndx_off) = if class64 {
            (read_u64(data, 40)? as usize, 58, 60, 62)
        } else {
            (read_u32(data, 32)? as usize, 46, 48, 50)
        };
        let shentsize = read_u16(data, shentsize_off)? as usize;
        let shnum = read_u16(data, shnum_off)? as usize;
        let shstrndx = read_u16(data, shstrndx_off)? as usize;
        let mut view = Self {
            data,
            class64,
            shoff,
            shentsize,
            shnum,
            shstrtab: SectionRange {
                offset: 0,
                size: 0,
                addr: 0,
            },
        };
        if shstrndx >= shnum {
            return Err(ElfViewError::Truncated(shoff));
        }
        let (_, shstrtab) = view.section_at(shstrndx)?;
        view.shstrtab = shstrtab;
        Ok(view)
    }

    pub fn machine(&self) -> u16 {
        // ident 已校验，e_machine 一定可读
        u16::from_le_bytes([self.data[18], self.data[19]])
    }

    /// 读取第 `index` 个节头，返回 (名字偏移, 位置)
    fn section_at(&self, index: usize) -> Result<(u32, SectionRange), ElfViewError> {
        let base = self
            .shoff
            .checked_add(index * self.shentsize)
            .ok_or(ElfViewError::Truncated(self.shoff))?;
        let name_off = read_u32(self.data, base)?;
        let (addr, offset, size) = if self.class64 {
            (
                read_u64(self.data, base + 16)?,
                read_u64(self.data, base + 24)? as usize,
                read_u64(self.data, base + 32)? as usize,
            )
        } else {
            (
                read_u32(self.data, base + 12)? as u64,
                read_u32(self.data, base + 16)? as usize,
                read_u32(self.data, base + 20)? as usize,
            )
        };
        if offset.checked_add(size).is_none_or(|end| end > self.data.len()) {
            return Err(ElfViewError::Truncated(base));
        }
        Ok((name_off, SectionRange { offset, size, addr }))
    }

    fn section_name(&self, name_off: u32) -> &'a [u8] {
        let pool = &self.data[self.shstrtab.offset..self.shstrtab.offset + self.shstrtab.size];
        let rel = name_off as usize;
        if rel >= pool.len() {
            return &[];
        }
        let end = pool[rel..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| rel + p)
            .unwrap_or(pool.len());
        &pool[rel..end]
    }

    /// 按名字查节
    pub fn section_by_name(&self, name: &str) -> Result<Option<SectionRange>, ElfViewError> {
        for index in 1..self.shnum {
            let (name_off, range) = self.section_at(index)?;
            if self.section_name(name_off) == name.as_bytes() {
                return Ok(Some(range));
            }
        }
        Ok(None)
    }

    /// 按名字查节，缺失视为错误
    pub fn require_section(&self, name: &'static str) -> Result<SectionRange, ElfViewError> {
        self.section_by_name(name)?
            .ok_or(ElfViewError::MissingSection(name))
    }
}

fn read_u16(data: &[u8], off: usize) -> Result<u16, ElfViewError> {
    data.get(off..off + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ElfViewError::Truncated(off))
}

fn read_u32(data: &[u8], off: usize) -> Result<u32, ElfViewError> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ElfViewError::Truncated(off))
}

fn read_u64(data: &[u8], off: usize) -> Result<u64, ElfViewError> {
    data.get(off..off + 8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ElfViewError::Truncated(off))
}
