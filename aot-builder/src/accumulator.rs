//! 编译产出累积器
//!
//! 在二进制序列化之前按「文件 → 类 → 方法」三层累积编译结果：
//! `start_file` → (`start_class` → `add_method`* → `end_class`)* →
//! `add_class_hash_table` → `end_file`，全部文件结束后 `write` 构造
//! 架构对应的 ELF 容器并落盘。
//!
//! 丢弃规则：没有编译出代码的方法直接跳过；一个方法都没保留的类
//! 整体丢弃；既没有保留类、类哈希表又为空的源文件整体丢弃。
//! 类头在 `end_file` 时按 `class_id` 升序重排，供加载侧二分查找。

use std::fs;
use std::path::Path;

use aot_format::{
    Arch, ArtifactHeader, CODE_INFO_ALIGNMENT, ClassHashEntry, ClassHeader, CodePrefix,
    FileHeader, GcKind, MethodBitmap, MethodHeader, SIZE_ALIGNMENT, StringTableBuilder, align_up,
    build_class_hash_table,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::elf::{ElfBuilder, ElfMode, SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE};
use crate::got::GotTableBuilder;

/// 构建错误
#[derive(Debug, Error)]
pub enum AotBuilderError {
    #[error("Unsupported target architecture: {0}")]
    UnsupportedArch(Arch),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 产物级构建参数
#[derive(Debug, Clone)]
pub struct ArtifactOptions {
    /// 目标架构
    pub arch: Arch,
    /// GC 类型
    pub gc_kind: GcKind,
    /// 编译环境校验和
    pub environment_checksum: u32,
    /// 是否为 boot 镜像产物
    pub boot_image: bool,
    /// 是否使用了类层次分析优化
    pub with_cha: bool,
    /// 编译时的类上下文（`path*checksum` 冒号串）
    pub class_context: String,
    /// 运行时内在函数槽位数
    pub intrinsic_slots: u32,
}

/// 构建统计
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub files_retained: u32,
    pub files_dropped: u32,
    pub classes_retained: u32,
    pub classes_dropped: u32,
    pub methods_recorded: u32,
    pub methods_skipped: u32,
    pub code_bytes: u64,
}

/// 单个编译完成的方法
///
/// 构造后不可变；`method_id` 为 `None` 表示编译未产出可用结果，
/// 累积时按「未编译」跳过。
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    arch: Arch,
    method_id: Option<u32>,
    /// 类内方法序号（位图下标）
    index: u32,
    code: Vec<u8>,
    code_info: Vec<u8>,
}

impl CompiledMethod {
    pub fn new(
        arch: Arch,
        method_id: Option<u32>,
        index: u32,
        code: Vec<u8>,
        code_info: Vec<u8>,
    ) -> Self {
        Self {
            arch,
            method_id,
            index,
            code,
            code_info,
        }
    }

    /// 方法记录在代码区内占用的总字节数
    ///
    /// 前缀、机器码、code-info 各自按约定对齐后求和。
    pub fn overall_size(&self) -> u32 {
        align_up(CodePrefix::SIZE as u32, self.arch.code_alignment())
            + align_up(self.code.len() as u32, CODE_INFO_ALIGNMENT)
            + align_up(self.code_info.len() as u32, SIZE_ALIGNMENT)
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn code_info(&self) -> &[u8] {
        &self.code_info
    }
}

struct ClassRecord {
    class_id: u32,
    container_offset: u32,
    methods_offset: u32,
    methods_count: u32,
    bitmap: MethodBitmap,
}

struct FileState {
    name_str: u32,
    checksum: u32,
    classes_start: usize,
    methods_start: usize,
    hash_table: Option<(u32, u32)>,
}

struct ClassState {
    class_id: u32,
    container_offset: u32,
    methods_start: usize,
    bitmap: MethodBitmap,
}

struct RoData {
    name: String,
    align: u64,
    data: Vec<u8>,
}

/// 产物累积器
pub struct AotBuilder {
    options: ArtifactOptions,
    strtab: StringTableBuilder,
    files: Vec<FileHeader>,
    classes: Vec<ClassRecord>,
    methods: Vec<(MethodHeader, CompiledMethod)>,
    hash_pool: Vec<ClassHashEntry>,
    rodata: Vec<RoData>,
    got: GotTableBuilder,
    code_size: u32,
    current_file: Option<FileState>,
    current_class: Option<ClassState>,
    stats: BuildStats,
}

impl AotBuilder {
    pub fn new(options: ArtifactOptions) -> Self {
        let got = GotTableBuilder::new(options.intrinsic_slots);
        Self {
            options,
            strtab: StringTableBuilder::new(),
            files: Vec::new(),
            classes: Vec::new(),
            methods: Vec::new(),
            hash_pool: Vec::new(),
            rodata: Vec::new(),
            got,
            code_size: 0,
            current_file: None,
            current_class: None,
            stats: BuildStats::default(),
        }
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn got_mut(&mut self) -> &mut GotTableBuilder {
        &mut self.got
    }

    /// 打开一个源文件的头记录
    pub fn start_file(&mut self, name: &str, checksum: u32) {
        assert!(self.current_file.is_none(), "previous file still open");
        let name_str = self.strtab.intern(name);
        self.current_file = Some(FileState {
            name_str,
            checksum,
            classes_start: self.classes.len(),
            methods_start: self.methods.len(),
            hash_table: None,
        });
    }

    /// 为当前源文件构建类哈希表并追加到共享条目池
    ///
    /// `classes` 是该容器全部类的 `(描述符, 容器偏移)`，与是否编译无关。
    pub fn add_class_hash_table(&mut self, classes: &[(&str, u32)]) {
        let state = self.current_file.as_mut().expect("no open file");
        debug_assert!(state.hash_table.is_none(), "hash table already added");
        let table = build_class_hash_table(classes);
        let offset = self.hash_pool.len() as u32;
        let size = table.len() as u32;
        self.hash_pool.extend_from_slice(&table);
        state.hash_table = Some((offset, size));
    }

    /// 关闭当前源文件
    ///
    /// 既没有保留类、哈希表又为空时整个文件头丢弃；否则定稿计数并把
    /// 新增的类头区间按 `class_id` 升序重排。
    pub fn end_file(&mut self) {
        let state = self.current_file.take().expect("no open file");
        debug_assert!(self.current_class.is_none(), "class still open at end_file");
        let classes_count = (self.classes.len() - state.classes_start) as u32;
        let (hash_offset, hash_size) = state
            .hash_table
            .unwrap_or((self.hash_pool.len() as u32, 0));
        if classes_count == 0 && hash_size == 0 {
            self.stats.files_dropped += 1;
            return;
        }
        self.classes[state.classes_start..].sort_by_key(|c| c.class_id);
        self.files.push(FileHeader {
            file_name_str: state.name_str,
            file_checksum: state.checksum,
            classes_offset: state.classes_start as u32,
            classes_count,
            methods_offset: state.methods_start as u32,
            methods_count: (self.methods.len() - state.methods_start) as u32,
            class_hash_table_offset: hash_offset,
            class_hash_table_size: hash_size,
        });
        self.stats.files_retained += 1;
    }

    /// 打开一个类记录，位图按类声明的方法总数分配
    pub fn start_class(&mut self, class_id: u32, container_offset: u32, declared_methods: u32) {
        assert!(self.current_file.is_some(), "start_class outside a file");
        assert!(self.current_class.is_none(), "previous class still open");
        self.current_class = Some(ClassState {
            class_id,
            container_offset,
            methods_start: self.methods.len(),
            bitmap: MethodBitmap::new(declared_methods),
        });
    }

    /// 累积一个编译完成的方法
    ///
    /// 无方法描述符或机器码为空的输入按「未编译」静默跳过。
    pub fn add_method(&mut self, method: CompiledMethod) {
        let Some(method_id) = method.method_id else {
            self.stats.methods_skipped += 1;
            return;
        };
        if method.code.is_empty() {
            self.stats.methods_skipped += 1;
            return;
        }
        let class = self.current_class.as_mut().expect("add_method outside a class");
        debug_assert_eq!(method.arch, self.options.arch);

        class.bitmap.set(method.index);
        let header = MethodHeader {
            method_id,
            code_offset: self.code_size,
            code_size: method.code.len() as u32,
        };
        self.code_size += align_up(method.overall_size(), self.options.arch.code_alignment());
        self.stats.methods_recorded += 1;
        self.stats.code_bytes += method.code.len() as u64;
        self.methods.push((header, method));
    }

    /// 关闭当前类；一个方法都没保留时类记录连同位图一起丢弃
    pub fn end_class(&mut self) {
        let class = self.current_class.take().expect("no open class");
        let methods_count = (self.methods.len() - class.methods_start) as u32;
        if methods_count == 0 {
            self.stats.classes_dropped += 1;
            return;
        }
        self.classes.push(ClassRecord {
            class_id: class.class_id,
            container_offset: class.container_offset,
            methods_offset: class.methods_start as u32,
            methods_count,
            bitmap: class.bitmap,
        });
        self.stats.classes_retained += 1;
    }

    /// 预留只读数据节的目录空间
    pub fn pre_size_ro_data_sections(&mut self, count: usize) {
        self.rodata.reserve(count);
    }

    /// 追加一个编译器产出的只读数据块，写出时成为独立的 ELF 节
    pub fn add_ro_data_section(&mut self, name: &str, align: u64, data: Vec<u8>) {
        self.rodata.push(RoData {
            name: name.to_owned(),
            align,
            data,
        });
    }

    /// 组装 `.aot` 节内容：产物头 + 文件头 + 哈希池 + 类头 + 方法头 +
    /// 位图池 + 字符串表
    fn emit_aot_blob(&mut self, cmdline: &str, file_name: &str) -> Vec<u8> {
        let file_name_str = self.strtab.intern(file_name);
        let cmdline_str = self.strtab.intern(cmdline);
        let class_context = self.options.class_context.clone();
        let class_ctx_str = self.strtab.intern(&class_context);

        let files_offset = ArtifactHeader::SIZE;
        let hash_offset = files_offset + self.files.len() * FileHeader::SIZE;
        let classes_offset = hash_offset + self.hash_pool.len() * ClassHashEntry::SIZE;
        let methods_offset = classes_offset + self.classes.len() * ClassHeader::SIZE;
        let bitmap_offset = methods_offset + self.methods.len() * MethodHeader::SIZE;
        let bitmap_words: u32 = self.classes.iter().map(|c| c.bitmap.word_len()).sum();
        let strtab_offset = bitmap_offset + bitmap_words as usize * 4;

        let header = ArtifactHeader {
            checksum: 0, // 占位：产物级校验和暂不计算
            environment_checksum: self.options.environment_checksum,
            arch: self.options.arch.tag(),
            gc_type: self.options.gc_kind.tag(),
            file_name_str,
            cmdline_str,
            boot_flag: self.options.boot_image as u32,
            with_cha: self.options.with_cha as u32,
            class_ctx_str,
            files_count: self.files.len() as u32,
            files_offset: files_offset as u32,
            class_hash_tables_size: self.hash_pool.len() as u32,
            class_hash_tables_offset: hash_offset as u32,
            classes_count: self.classes.len() as u32,
            classes_offset: classes_offset as u32,
            methods_count: self.methods.len() as u32,
            methods_offset: methods_offset as u32,
            bitmap_size_words: bitmap_words,
            bitmap_offset: bitmap_offset as u32,
            strtab_size: self.strtab.len(),
            strtab_offset: strtab_offset as u32,
        };

        let mut blob = Vec::with_capacity(strtab_offset + self.strtab.len() as usize);
        header.write_to(&mut blob);
        for file in &self.files {
            file.write_to(&mut blob);
        }
        for entry in &self.hash_pool {
            entry.write_to(&mut blob);
        }
        let mut word_offset = 0u32;
        for class in &self.classes {
            ClassHeader {
                class_id: class.class_id,
                container_offset: class.container_offset,
                methods_count: class.methods_count,
                methods_offset: class.methods_offset,
                bitmap_offset: word_offset,
                bitmap_size: class.bitmap.bit_len(),
            }
            .write_to(&mut blob);
            word_offset += class.bitmap.word_len();
        }
        for (header, _) in &self.methods {
            header.write_to(&mut blob);
        }
        for class in &self.classes {
            for word in class.bitmap.words() {
                blob.extend_from_slice(&word.to_le_bytes());
            }
        }
        debug_assert_eq!(blob.len(), strtab_offset);
        blob.extend_from_slice(self.strtab.as_bytes());
        blob
    }

    /// 组装代码区：每个方法一条前缀 + 机器码 + code-info 记录
    fn emit_code_blob(&self) -> Vec<u8> {
        let code_align = self.options.arch.code_alignment();
        let mut text = vec![0u8; self.code_size as usize];
        for (header, method) in &self.methods {
            let base = header.code_offset as usize;
            let code_start = align_up(CodePrefix::SIZE as u32, code_align);
            let info_offset = code_start + align_up(method.code.len() as u32, CODE_INFO_ALIGNMENT);
            let mut prefix = Vec::with_capacity(CodePrefix::SIZE);
            CodePrefix {
                code_size: method.code.len() as u32,
                code_info_offset: info_offset,
                code_info_size: method.code_info.len() as u32,
            }
            .write_to(&mut prefix);
            text[base..base + CodePrefix::SIZE].copy_from_slice(&prefix);
            let code_at = base + code_start as usize;
            text[code_at..code_at + method.code.len()].copy_from_slice(&method.code);
            let info_at = base + info_offset as usize;
            text[info_at..info_at + method.code_info.len()].copy_from_slice(&method.code_info);
        }
        text
    }

    /// 架构分派入口：构造 ELF 容器并序列化为完整产物字节
    pub fn emit(&mut self, cmdline: &str, file_name: &str) -> Result<Vec<u8>, AotBuilderError> {
        if let Arch::X86 = self.options.arch {
            return Err(AotBuilderError::UnsupportedArch(self.options.arch));
        }
        assert!(self.current_file.is_none(), "emit with an open file");
        assert!(self.current_class.is_none(), "emit with an open class");

        let arch = self.options.arch;
        let aot_blob = self.emit_aot_blob(cmdline, file_name);
        let text_blob = self.emit_code_blob();
        let got_blob = self.got.fill(arch);

        debug!(
            files = self.files.len(),
            classes = self.classes.len(),
            methods = self.methods.len(),
            code_bytes = self.code_size,
            got_bytes = got_blob.len(),
            "assembling elf container"
        );

        let mut elf = ElfBuilder::new(arch, ElfMode::Aot);
        elf.add_section(".aot", SHF_ALLOC, 16, aot_blob);
        elf.pre_size_ro_data_sections(self.rodata.len());
        for ro in &self.rodata {
            elf.add_ro_data_section(&ro.name, ro.align, ro.data.clone());
        }
        elf.add_section(
            ".aot_got",
            SHF_ALLOC | SHF_WRITE,
            arch.pointer_size() as u64,
            got_blob,
        );
        elf.add_section(
            ".text",
            SHF_ALLOC | SHF_EXECINSTR,
            arch.code_alignment() as u64,
            text_blob,
        );
        elf.build();
        Ok(elf.write_to_vec())
    }

    /// 写出产物文件
    pub fn write(&mut self, cmdline: &str, output: &Path) -> Result<(), AotBuilderError> {
        let name = output.to_string_lossy().into_owned();
        let bytes = self.emit(cmdline, &name)?;
        fs::write(output, bytes)?;
        info!(
            output = %name,
            files = self.stats.files_retained,
            classes = self.stats.classes_retained,
            methods = self.stats.methods_recorded,
            code_bytes = self.stats.code_bytes,
            "aot artifact written"
        );
        Ok(())
    }
}
