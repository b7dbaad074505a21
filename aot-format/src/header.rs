//! 磁盘定长记录：产物头、源文件头、类头、方法头
//!
//! 产物头位于 `.aot` 节起始处，其中的 `*_offset` 字段是相对 `.aot`
//! 节起始的字节偏移；源文件头和类头中的 `classes_offset` /
//! `methods_offset` 则是全局类头 / 方法头数组中的元素下标，
//! 供加载侧 O(1) 索引访问。

use thiserror::Error;

/// 产物魔数，4 个 ASCII 字节
pub const AOT_MAGIC: [u8; 4] = *b"AOT\0";

/// 产物格式版本，4 个 ASCII 字节
pub const AOT_VERSION: [u8; 4] = *b"010\0";

/// 格式错误
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Truncated artifact header: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("Wrong ArtifactHeader magic: {0:?} vs {AOT_MAGIC:?}")]
    BadMagic([u8; 4]),
    #[error("Wrong ArtifactHeader version: {0:?} vs {AOT_VERSION:?}")]
    BadVersion([u8; 4]),
}

#[inline]
pub fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

#[inline]
fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// 产物头，位于 `.aot` 节起始的定长记录
#[derive(Debug, Clone, Default)]
pub struct ArtifactHeader {
    /// 整体校验和（当前始终写 0，加载时不校验）
    pub checksum: u32,
    /// 编译环境校验和
    pub environment_checksum: u32,
    /// 目标架构标签
    pub arch: u32,
    /// GC 类型标签
    pub gc_type: u32,
    /// 产物自身文件名（字符串表偏移）
    pub file_name_str: u32,
    /// 构建命令行（字符串表偏移）
    pub cmdline_str: u32,
    /// 是否为 boot 镜像产物 (0/1)
    pub boot_flag: u32,
    /// 是否使用了类层次分析优化 (0/1)
    pub with_cha: u32,
    /// 类上下文字符串（字符串表偏移）
    pub class_ctx_str: u32,
    /// 源文件头数量
    pub files_count: u32,
    /// 源文件头区域偏移
    pub files_offset: u32,
    /// 类哈希表池总条目数
    pub class_hash_tables_size: u32,
    /// 类哈希表池偏移
    pub class_hash_tables_offset: u32,
    /// 类头数量
    pub classes_count: u32,
    /// 类头区域偏移
    pub classes_offset: u32,
    /// 方法头数量
    pub methods_count: u32,
    /// 方法头区域偏移
    pub methods_offset: u32,
    /// 位图池大小（字）
    pub bitmap_size_words: u32,
    /// 位图池偏移
    pub bitmap_offset: u32,
    /// 字符串表大小（字节）
    pub strtab_size: u32,
    /// 字符串表偏移
    pub strtab_offset: u32,
}

impl ArtifactHeader {
    pub const SIZE: usize = 8 + 21 * 4;

    /// 序列化到缓冲区末尾
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&AOT_MAGIC);
        out.extend_from_slice(&AOT_VERSION);
        push_u32(out, self.checksum);
        push_u32(out, self.environment_checksum);
        push_u32(out, self.arch);
        push_u32(out, self.gc_type);
        push_u32(out, self.file_name_str);
        push_u32(out, self.cmdline_str);
        push_u32(out, self.boot_flag);
        push_u32(out, self.with_cha);
        push_u32(out, self.class_ctx_str);
        push_u32(out, self.files_count);
        push_u32(out, self.files_offset);
        push_u32(out, self.class_hash_tables_size);
        push_u32(out, self.class_hash_tables_offset);
        push_u32(out, self.classes_count);
        push_u32(out, self.classes_offset);
        push_u32(out, self.methods_count);
        push_u32(out, self.methods_offset);
        push_u32(out, self.bitmap_size_words);
        push_u32(out, self.bitmap_offset);
        push_u32(out, self.strtab_size);
        push_u32(out, self.strtab_offset);
    }

    /// 从 `.aot` 节起始字节解析并校验魔数 / 版本
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::Truncated {
                need: Self::SIZE,
                got: buf.len(),
            });
        }
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != AOT_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let version: [u8; 4] = buf[4..8].try_into().unwrap();
        if version != AOT_VERSION {
            return Err(FormatError::BadVersion(version));
        }
        let mut fields = [0u32; 21];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = read_u32(buf, 8 + i * 4);
        }
        Ok(Self {
            checksum: fields[0],
            environment_checksum: fields[1],
            arch: fields[2],
            gc_type: fields[3],
            file_name_str: fields[4],
            cmdline_str: fields[5],
            boot_flag: fields[6],
            with_cha: fields[7],
            class_ctx_str: fields[8],
            files_count: fields[9],
            files_offset: fields[10],
            class_hash_tables_size: fields[11],
            class_hash_tables_offset: fields[12],
            classes_count: fields[13],
            classes_offset: fields[14],
            methods_count: fields[15],
            methods_offset: fields[16],
            bitmap_size_words: fields[17],
            bitmap_offset: fields[18],
            strtab_size: fields[19],
            strtab_offset: fields[20],
        })
    }
}

// 头部大小必须保持 u32 对齐
const _: () = assert!(ArtifactHeader::SIZE % 4 == 0);

/// 源文件头
///
/// `classes_offset` / `methods_offset` 是全局数组下标，
/// `class_hash_table_offset` / `class_hash_table_size` 是共享哈希条目池
/// 中的下标 / 条目数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub file_name_str: u32,
    pub file_checksum: u32,
    pub classes_offset: u32,
    pub classes_count: u32,
    pub methods_offset: u32,
    pub methods_count: u32,
    pub class_hash_table_offset: u32,
    pub class_hash_table_size: u32,
}

impl FileHeader {
    pub const SIZE: usize = 8 * 4;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        push_u32(out, self.file_name_str);
        push_u32(out, self.file_checksum);
        push_u32(out, self.classes_offset);
        push_u32(out, self.classes_count);
        push_u32(out, self.methods_offset);
        push_u32(out, self.methods_count);
        push_u32(out, self.class_hash_table_offset);
        push_u32(out, self.class_hash_table_size);
    }

    /// 从定长记录数组 `buf` 中读取第 `index` 项
    pub fn read_at(buf: &[u8], index: usize) -> Self {
        let base = index * Self::SIZE;
        Self {
            file_name_str: read_u32(buf, base),
            file_checksum: read_u32(buf, base + 4),
            classes_offset: read_u32(buf, base + 8),
            classes_count: read_u32(buf, base + 12),
            methods_offset: read_u32(buf, base + 16),
            methods_count: read_u32(buf, base + 20),
            class_hash_table_offset: read_u32(buf, base + 24),
            class_hash_table_size: read_u32(buf, base + 28),
        }
    }
}

/// 类头
///
/// 同一源文件的类头按 `class_id` 升序排列，供加载侧二分查找。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassHeader {
    pub class_id: u32,
    /// 类在其源字节码容器中的实体偏移
    pub container_offset: u32,
    pub methods_count: u32,
    /// 全局方法头数组中的起始下标
    pub methods_offset: u32,
    /// 位图池中的起始字偏移
    pub bitmap_offset: u32,
    /// 位图长度（位），等于类声明的方法总数
    pub bitmap_size: u32,
}

impl ClassHeader {
    pub const SIZE: usize = 6 * 4;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        push_u32(out, self.class_id);
        push_u32(out, self.container_offset);
        push_u32(out, self.methods_count);
        push_u32(out, self.methods_offset);
        push_u32(out, self.bitmap_offset);
        push_u32(out, self.bitmap_size);
    }

    pub fn read_at(buf: &[u8], index: usize) -> Self {
        let base = index * Self::SIZE;
        Self {
            class_id: read_u32(buf, base),
            container_offset: read_u32(buf, base + 4),
            methods_count: read_u32(buf, base + 8),
            methods_offset: read_u32(buf, base + 12),
            bitmap_offset: read_u32(buf, base + 16),
            bitmap_size: read_u32(buf, base + 20),
        }
    }
}

/// 方法头
///
/// `code_offset` 是方法记录（前缀）相对代码区起始的字节偏移。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodHeader {
    pub method_id: u32,
    pub code_offset: u32,
    pub code_size: u32,
}

impl MethodHeader {
    pub const SIZE: usize = 3 * 4;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        push_u32(out, self.method_id);
        push_u32(out, self.code_offset);
        push_u32(out, self.code_size);
    }

    pub fn read_at(buf: &[u8], index: usize) -> Self {
        let base = index * Self::SIZE;
        Self {
            method_id: read_u32(buf, base),
            code_offset: read_u32(buf, base + 4),
            code_size: read_u32(buf, base + 8),
        }
    }
}

/// 方法记录前缀：机器码与 code-info 之前的定长描述
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodePrefix {
    pub code_size: u32,
    /// 相对记录起始的 code-info 字节偏移
    pub code_info_offset: u32,
    pub code_info_size: u32,
}

impl CodePrefix {
    pub const SIZE: usize = 3 * 4;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        push_u32(out, self.code_size);
        push_u32(out, self.code_info_offset);
        push_u32(out, self.code_info_size);
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            code_size: read_u32(buf, 0),
            code_info_offset: read_u32(buf, 4),
            code_info_size: read_u32(buf, 8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_header_roundtrip() {
        let header = ArtifactHeader {
            environment_checksum: 0xDEAD_BEEF,
            arch: 1,
            gc_type: 2,
            cmdline_str: 17,
            files_count: 3,
            files_offset: ArtifactHeader::SIZE as u32,
            strtab_size: 128,
            ..Default::default()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), ArtifactHeader::SIZE);

        let loaded = ArtifactHeader::parse(&buf).unwrap();
        assert_eq!(loaded.environment_checksum, 0xDEAD_BEEF);
        assert_eq!(loaded.arch, 1);
        assert_eq!(loaded.gc_type, 2);
        assert_eq!(loaded.cmdline_str, 17);
        assert_eq!(loaded.files_count, 3);
        assert_eq!(loaded.files_offset, ArtifactHeader::SIZE as u32);
        assert_eq!(loaded.strtab_size, 128);
        assert_eq!(loaded.checksum, 0);
    }

    #[test]
    fn test_artifact_header_bad_magic() {
        let mut buf = Vec::new();
        ArtifactHeader::default().write_to(&mut buf);
        buf[0] = b'X';
        assert!(matches!(
            ArtifactHeader::parse(&buf),
            Err(FormatError::BadMagic(_))
        ));
    }

    #[test]
    fn test_artifact_header_truncated() {
        let buf = vec![0u8; 16];
        assert!(matches!(
            ArtifactHeader::parse(&buf),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_fixed_record_roundtrip() {
        let mut buf = Vec::new();
        for i in 0..4u32 {
            MethodHeader {
                method_id: 100 + i,
                code_offset: i * 64,
                code_size: 10 + i,
            }
            .write_to(&mut buf);
        }
        assert_eq!(buf.len(), 4 * MethodHeader::SIZE);
        let third = MethodHeader::read_at(&buf, 2);
        assert_eq!(third.method_id, 102);
        assert_eq!(third.code_offset, 128);
        assert_eq!(third.code_size, 12);
    }

    #[test]
    fn test_class_header_roundtrip() {
        let mut buf = Vec::new();
        ClassHeader {
            class_id: 7,
            container_offset: 0x40,
            methods_count: 2,
            methods_offset: 5,
            bitmap_offset: 1,
            bitmap_size: 9,
        }
        .write_to(&mut buf);
        let loaded = ClassHeader::read_at(&buf, 0);
        assert_eq!(loaded.class_id, 7);
        assert_eq!(loaded.container_offset, 0x40);
        assert_eq!(loaded.bitmap_size, 9);
    }
}
