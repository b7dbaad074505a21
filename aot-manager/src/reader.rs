//! 产物读取器
//!
//! 把一个已序列化的 AOT 产物加载进内存并提供结构化只读访问。
//! 所有访问器都基于产物头中的定长偏移计算，O(1) 或 O(log n)，
//! 不重新解析源字节码。
//!
//! `open` 是唯一可失败的操作：它处理外部提供、可能过期或错配的
//! 文件，失败带可读诊断。成功打开之后产物被信任为内部一致
//! （由写入侧保证），访问器不再返回错误，一致性破坏直接终止。

use std::fs;
use std::path::Path;

use aot_format::{
    Arch, ArtifactHeader, ClassHashEntry, ClassHeader, CodePrefix, FileHeader, FormatError,
    GcKind, MethodBitmap, MethodHeader, TagError, align_up, descriptor_hash, lookup_class, str_at,
};
use thiserror::Error;
use tracing::debug;

use crate::elf_view::{ElfView, ElfViewError, SectionRange};

/// 产物打开错误
#[derive(Debug, Error)]
pub enum AotLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Elf(#[from] ElfViewError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error("Wrong ArtifactHeader gc-type: {actual} vs {expected}")]
    GcMismatch { actual: GcKind, expected: GcKind },
    #[error("Wrong ArtifactHeader environment checksum: {actual:#x} vs {expected:#x}")]
    EnvironmentMismatch { actual: u32, expected: u32 },
    #[error("Corrupted ArtifactHeader: {0}")]
    Corrupted(String),
}

/// 打开参数
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// 运行时配置的 GC 类型，与产物记录不一致则拒绝加载
    pub expected_gc: GcKind,
    /// 期望的编译环境校验和；`None` 表示不校验
    pub expected_environment_checksum: Option<u32>,
}

/// 产物概要信息
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub arch: Arch,
    pub gc_kind: GcKind,
    pub files: u32,
    pub classes: u32,
    pub methods: u32,
    pub code_bytes: usize,
}

/// 已打开的 AOT 产物
#[derive(Debug)]
pub struct AotFile {
    file_name: String,
    data: Vec<u8>,
    header: ArtifactHeader,
    arch: Arch,
    gc_kind: GcKind,
    aot: SectionRange,
    text: SectionRange,
    got: Option<SectionRange>,
}

impl AotFile {
    /// 打开并校验一个产物文件
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self, AotLoadError> {
        let data = fs::read(path)?;
        let (aot, text, got, machine) = {
            let view = ElfView::parse(&data)?;
            (
                view.require_section(".aot")?,
                view.require_section(".text")?,
                view.section_by_name(".aot_got")?,
                view.machine(),
            )
        };
        let header = ArtifactHeader::parse(&data[aot.offset..aot.offset + aot.size])?;
        let arch = Arch::from_tag(header.arch)?;
        let gc_kind = GcKind::from_tag(header.gc_type)?;
        if machine != arch.elf_machine() {
            return Err(AotLoadError::Corrupted(format!(
                "ELF machine {machine} does not match ArtifactHeader architecture {arch}"
            )));
        }
        if gc_kind != options.expected_gc {
            return Err(AotLoadError::GcMismatch {
                actual: gc_kind,
                expected: options.expected_gc,
            });
        }
        if let Some(expected) = options.expected_environment_checksum {
            if header.environment_checksum != expected {
                return Err(AotLoadError::EnvironmentMismatch {
                    actual: header.environment_checksum,
                    expected,
                });
            }
        }
        validate_regions(&header, aot.size)?;

        let file = Self {
            file_name: path.to_string_lossy().into_owned(),
            data,
            header,
            arch,
            gc_kind,
            aot,
            text,
            got,
        };
        debug!(
            file = %file.file_name,
            arch = %file.arch,
            gc = %file.gc_kind,
            files = file.header.files_count,
            methods = file.header.methods_count,
            "aot artifact opened"
        );
        Ok(file)
    }

    fn aot_bytes(&self) -> &[u8] {
        &self.data[self.aot.offset..self.aot.offset + self.aot.size]
    }

    fn region(&self, offset: u32, bytes: usize) -> &[u8] {
        let start = offset as usize;
        &self.aot_bytes()[start..start + bytes]
    }

    fn strtab_bytes(&self) -> &[u8] {
        self.region(self.header.strtab_offset, self.header.strtab_size as usize)
    }

    /// 打开时使用的文件路径
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 构建时记录的产物文件名
    pub fn recorded_file_name(&self) -> &str {
        self.string(self.header.file_name_str)
    }

    pub fn header(&self) -> &ArtifactHeader {
        &self.header
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn gc_kind(&self) -> GcKind {
        self.gc_kind
    }

    /// 构建命令行（逐字记录的出处信息）
    pub fn cmdline(&self) -> &str {
        self.string(self.header.cmdline_str)
    }

    /// 编译时的类上下文
    pub fn class_context(&self) -> &str {
        self.string(self.header.class_ctx_str)
    }

    pub fn is_boot(&self) -> bool {
        self.header.boot_flag != 0
    }

    pub fn with_cha(&self) -> bool {
        self.header.with_cha != 0
    }

    /// 字符串表中偏移 `offset` 处的字符串
    pub fn string(&self, offset: u32) -> &str {
        str_at(self.strtab_bytes(), offset)
    }

    pub fn files_count(&self) -> usize {
        self.header.files_count as usize
    }

    pub fn file_header(&self, index: usize) -> FileHeader {
        assert!(index < self.files_count());
        let region = self.region(
            self.header.files_offset,
            self.files_count() * FileHeader::SIZE,
        );
        FileHeader::read_at(region, index)
    }

    /// 按源文件名线性查找（单个产物内的文件数通常很小）
    pub fn find_source_file(&self, name: &str) -> Option<(usize, FileHeader)> {
        (0..self.files_count()).find_map(|index| {
            let header = self.file_header(index);
            (self.string(header.file_name_str) == name).then_some((index, header))
        })
    }

    /// 全局类头数组中的第 `index` 项
    pub fn class_header(&self, index: usize) -> ClassHeader {
        assert!(index < self.header.classes_count as usize);
        let region = self.region(
            self.header.classes_offset,
            self.header.classes_count as usize * ClassHeader::SIZE,
        );
        ClassHeader::read_at(region, index)
    }

    /// 一个源文件的全部类头（构建侧已按 class_id 升序排好）
    pub fn class_headers(&self, file: &FileHeader) -> Vec<ClassHeader> {
        let start = file.classes_offset as usize;
        (start..start + file.classes_count as usize)
            .map(|index| self.class_header(index))
            .collect()
    }

    /// 在源文件的类头区间内按 `class_id` 二分查找
    pub fn find_class(&self, file: &FileHeader, class_id: u32) -> Option<ClassHeader> {
        let mut lo = file.classes_offset as usize;
        let mut hi = lo + file.classes_count as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let header = self.class_header(mid);
            match header.class_id.cmp(&class_id) {
                std::cmp::Ordering::Equal => return Some(header),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// 一个源文件的类哈希表切片
    pub fn class_hash_table(&self, file: &FileHeader) -> Vec<ClassHashEntry> {
        let start = file.class_hash_table_offset as usize;
        let region = self.region(
            self.header.class_hash_tables_offset,
            self.header.class_hash_tables_size as usize * ClassHashEntry::SIZE,
        );
        (start..start + file.class_hash_table_size as usize)
            .map(|index| ClassHashEntry::read_at(region, index))
            .collect()
    }

    /// 经由类哈希表按描述符查类的容器偏移
    pub fn find_class_by_descriptor(&self, file: &FileHeader, descriptor: &str) -> Option<u32> {
        let table = self.class_hash_table(file);
        lookup_class(&table, descriptor_hash(descriptor))
    }

    /// 全局方法头数组中的第 `index` 项
    pub fn method_header(&self, index: usize) -> MethodHeader {
        assert!(index < self.header.methods_count as usize);
        let region = self.region(
            self.header.methods_offset,
            self.header.methods_count as usize * MethodHeader::SIZE,
        );
        MethodHeader::read_at(region, index)
    }

    /// 类内第 `index` 个保留方法的方法头
    pub fn method_code_entry(&self, class: &ClassHeader, index: u32) -> MethodHeader {
        assert!(index < class.methods_count);
        self.method_header(class.methods_offset as usize + index as usize)
    }

    fn method_record(&self, method: &MethodHeader) -> (&[u8], CodePrefix) {
        let base = self.text.offset + method.code_offset as usize;
        let record = &self.data[base..];
        let prefix = CodePrefix::read(record);
        debug_assert_eq!(prefix.code_size, method.code_size);
        (record, prefix)
    }

    /// 方法的机器码字节
    pub fn method_code(&self, method: &MethodHeader) -> &[u8] {
        let (record, prefix) = self.method_record(method);
        let start = align_up(CodePrefix::SIZE as u32, self.arch.code_alignment()) as usize;
        &record[start..start + prefix.code_size as usize]
    }

    /// 方法的 code-info（stack map）字节
    pub fn method_code_info(&self, method: &MethodHeader) -> &[u8] {
        let (record, prefix) = self.method_record(method);
        let start = prefix.code_info_offset as usize;
        &record[start..start + prefix.code_info_size as usize]
    }

    /// 类的方法存在位图
    pub fn bitmap(&self, class: &ClassHeader) -> MethodBitmap {
        let words_total = self.header.bitmap_size_words as usize;
        let region = self.region(self.header.bitmap_offset, words_total * 4);
        let word_count = class.bitmap_size.div_ceil(aot_format::BITMAP_WORD_BITS) as usize;
        let start = class.bitmap_offset as usize;
        let words = (start..start + word_count)
            .map(|i| u32::from_le_bytes(region[i * 4..i * 4 + 4].try_into().unwrap()))
            .collect();
        MethodBitmap::from_words(words, class.bitmap_size)
    }

    /// 间接寻址表在文件中的位置（若存在）
    pub fn got_range(&self) -> Option<SectionRange> {
        self.got
    }

    /// 间接寻址表的只读视图
    pub fn got_bytes(&self) -> Option<&[u8]> {
        self.got
            .map(|range| &self.data[range.offset..range.offset + range.size])
    }

    /// 间接寻址表的可写视图，供加载回调填充内在函数槽位
    pub fn got_bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.got
            .map(|range| &mut self.data[range.offset..range.offset + range.size])
    }

    /// 概要信息
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            file_name: self.file_name.clone(),
            arch: self.arch,
            gc_kind: self.gc_kind,
            files: self.header.files_count,
            classes: self.header.classes_count,
            methods: self.header.methods_count,
            code_bytes: self.text.size,
        }
    }
}

/// 打开时一次性校验各区域都落在 `.aot` 节内
fn validate_regions(header: &ArtifactHeader, aot_size: usize) -> Result<(), AotLoadError> {
    let checks: [(&str, u32, usize); 6] = [
        (
            "file headers",
            header.files_offset,
            header.files_count as usize * FileHeader::SIZE,
        ),
        (
            "class hash tables",
            header.class_hash_tables_offset,
            header.class_hash_tables_size as usize * ClassHashEntry::SIZE,
        ),
        (
            "class headers",
            header.classes_offset,
            header.classes_count as usize * ClassHeader::SIZE,
        ),
        (
            "method headers",
            header.methods_offset,
            header.methods_count as usize * MethodHeader::SIZE,
        ),
        (
            "method bitmaps",
            header.bitmap_offset,
            header.bitmap_size_words as usize * 4,
        ),
        ("string table", header.strtab_offset, header.strtab_size as usize),
    ];
    for (what, offset, bytes) in checks {
        let end = offset as usize + bytes;
        if end > aot_size {
            return Err(AotLoadError::Corrupted(format!(
                "{what} region ends at {end}, .aot section is {aot_size} bytes"
            )));
        }
    }
    Ok(())
}
