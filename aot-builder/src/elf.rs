//! ELF 容器构建器
//!
//! 把已经准备好的节内容组装成一个合法的 ELF 共享对象（32 位或
//! 64 位，按目标架构的字宽策略选择）。两种布局模式：
//!
//! - **Aot**：完整产物模式。固定节目录 `.hash` / `.dynstr` / `.dynsym` /
//!   `.aot` / 只读数据节 / `.aot_got` / `.text` / `.dynamic` / `.shstrtab`，
//!   节按权限分组进页对齐的加载段；`.aot_got` 紧贴在代码段之前，
//!   编译代码可以用相对代码锚点的小负偏移访问槽位。
//! - **JitDebug**：进程内调试模式。ET_REL、无程序头、线性布局，
//!   只用于单个函数的调试镜像。
//!
//! 符号地址与 `.dynamic` 表项在声明时尚不可知，统一记录为
//! [`AddressSource`]，布局完成后在一个显式的解析遍里回填，
//! 不使用闭包延迟求值。

use std::fs;
use std::path::Path;

use aot_format::{Arch, StringTableBuilder};
use tracing::debug;

/// 加载段起始对齐
pub const PAGE_SIZE: u64 = 0x1000;

const EI_MAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ELFOSABI_NONE: u8 = 0;

const ET_REL: u16 = 1;
const ET_DYN: u16 = 3;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_HASH: u32 = 5;
const SHT_DYNAMIC: u32 = 6;
const SHT_DYNSYM: u32 = 11;

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

const DT_NULL: u64 = 0;
const DT_HASH: u64 = 4;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_STRSZ: u64 = 10;
const DT_SYMENT: u64 = 11;

const STB_GLOBAL: u8 = 1;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;

/// ELF 字宽策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    pub fn for_arch(arch: Arch) -> Self {
        if arch.is_64bit() {
            ElfClass::Elf64
        } else {
            ElfClass::Elf32
        }
    }

    fn ehdr_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    fn phdr_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    fn shdr_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }

    fn sym_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 16,
            ElfClass::Elf64 => 24,
        }
    }

    fn dyn_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 8,
            ElfClass::Elf64 => 16,
        }
    }

    fn word_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// SysV ELF 符号哈希
fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = (h << 4).wrapping_add(b as u32);
        let g = h & 0xF000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

#[inline]
fn align_u64(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_word(out: &mut Vec<u8>, class: ElfClass, v: u64) {
    match class {
        ElfClass::Elf32 => push_u32(out, v as u32),
        ElfClass::Elf64 => push_u64(out, v),
    }
}

/// 把字宽值写回缓冲区中给定偏移处
fn patch_word(data: &mut [u8], offset: usize, class: ElfClass, v: u64) {
    match class {
        ElfClass::Elf32 => data[offset..offset + 4].copy_from_slice(&(v as u32).to_le_bytes()),
        ElfClass::Elf64 => data[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
    }
}

/// 布局模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMode {
    Aot,
    JitDebug,
}

/// 节句柄，注册后保持稳定（符号表通过它引用节下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(usize);

/// 延迟地址来源：布局完成后统一解析
#[derive(Debug, Clone, Copy)]
pub enum AddressSource {
    SectionStart(SectionId),
    SectionEnd(SectionId),
}

struct Section {
    name: String,
    sh_type: u32,
    flags: u64,
    align: u64,
    entsize: u64,
    link: u32,
    info: u32,
    data: Vec<u8>,
    // 布局结果
    addr: u64,
    offset: u64,
    name_off: u32,
}

struct SymbolDecl {
    name: String,
    size: u64,
    section: SectionId,
    source: AddressSource,
    is_function: bool,
}

struct DynPatch {
    entry_index: usize,
    source: AddressSource,
}

struct Segment {
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

/// ELF 容器构建器
pub struct ElfBuilder {
    arch: Arch,
    class: ElfClass,
    mode: ElfMode,
    sections: Vec<Section>,
    symbols: Vec<SymbolDecl>,
    dyn_patches: Vec<DynPatch>,
    segments: Vec<Segment>,
    open_segment: Option<usize>,
    off_cursor: u64,
    addr_cursor: u64,
    shoff: u64,
    file_size: u64,
    symtab_section: Option<SectionId>,
    built: bool,
}

impl ElfBuilder {
    pub fn new(arch: Arch, mode: ElfMode) -> Self {
        let mut builder = Self {
            arch,
            class: ElfClass::for_arch(arch),
            mode,
            sections: Vec::new(),
            symbols: Vec::new(),
            dyn_patches: Vec::new(),
            segments: Vec::new(),
            open_segment: None,
            off_cursor: 0,
            addr_cursor: 0,
            shoff: 0,
            file_size: 0,
            symtab_section: None,
            built: false,
        };
        // 下标 0 固定为空节
        builder.sections.push(Section {
            name: String::new(),
            sh_type: 0,
            flags: 0,
            align: 0,
            entsize: 0,
            link: 0,
            info: 0,
            data: Vec::new(),
            addr: 0,
            offset: 0,
            name_off: 0,
        });
        if mode == ElfMode::Aot {
            // 固定目录头部：.hash / .dynstr / .dynsym，内容在 build 时填充
            builder.push_section(".hash", SHT_HASH, SHF_ALLOC, 4, 4, Vec::new());
            builder.push_section(".dynstr", SHT_STRTAB, SHF_ALLOC, 1, 0, Vec::new());
            let sym_size = builder.class.sym_size();
            builder.push_section(".dynsym", SHT_DYNSYM, SHF_ALLOC, 8, sym_size, Vec::new());
        }
        builder
    }

    fn push_section(
        &mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
        align: u64,
        entsize: u64,
        data: Vec<u8>,
    ) -> SectionId {
        self.sections.push(Section {
            name: name.to_owned(),
            sh_type,
            flags,
            align,
            entsize,
            link: 0,
            info: 0,
            data,
            addr: 0,
            offset: 0,
            name_off: 0,
        });
        SectionId(self.sections.len() - 1)
    }

    /// 注册一个节，按注册顺序布局；节一旦注册不再移除
    pub fn add_section(
        &mut self,
        name: &str,
        flags: u64,
        align: u64,
        data: Vec<u8>,
    ) -> SectionId {
        assert!(!self.built, "section added after build");
        self.push_section(name, SHT_PROGBITS, flags, align, 0, data)
    }

    /// 预留 `count` 个只读数据节的目录空间
    pub fn pre_size_ro_data_sections(&mut self, count: usize) {
        self.sections.reserve(count);
    }

    /// 追加一个调用方命名的只读数据节
    pub fn add_ro_data_section(&mut self, name: &str, align: u64, data: Vec<u8>) -> SectionId {
        self.add_section(name, SHF_ALLOC, align, data)
    }

    /// 声明一个符号；最终虚拟地址在布局后由 `source` 解析
    pub fn add_symbol(
        &mut self,
        name: &str,
        size: u64,
        section: SectionId,
        source: AddressSource,
        is_function: bool,
    ) {
        assert!(!self.built, "symbol added after build");
        self.symbols.push(SymbolDecl {
            name: name.to_owned(),
            size,
            section,
            source,
            is_function,
        });
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .filter(|&i| i != 0)
            .map(SectionId)
    }

    fn section_len(&self, id: SectionId) -> u64 {
        self.sections[id.0].data.len() as u64
    }

    /// 组装元数据节并完成布局
    ///
    /// 依次：声明常备符号、填充 `.dynstr` / `.dynsym` / `.hash`（AOT 模式
    /// 另有 `.dynamic`）、分段布局、解析延迟地址、回填 `.dynamic`。
    pub fn build(&mut self) {
        assert!(!self.built, "build called twice");

        self.declare_standard_symbols();
        match self.mode {
            ElfMode::Aot => self.build_aot(),
            ElfMode::JitDebug => self.build_jit_debug(),
        }
        self.built = true;
        debug!(
            arch = %self.arch,
            sections = self.sections.len(),
            segments = self.segments.len(),
            file_size = self.file_size,
            "elf layout complete"
        );
    }

    fn declare_standard_symbols(&mut self) {
        let text = self
            .section_by_name(".text")
            .expect("builder requires a .text section");
        let text_len = self.section_len(text);
        let mut standard = vec![SymbolDecl {
            name: "code".to_owned(),
            size: text_len,
            section: text,
            source: AddressSource::SectionStart(text),
            is_function: true,
        }];
        if self.mode == ElfMode::Aot {
            standard.push(SymbolDecl {
                name: "code_end".to_owned(),
                size: 0,
                section: text,
                source: AddressSource::SectionEnd(text),
                is_function: true,
            });
            let aot = self
                .section_by_name(".aot")
                .expect("aot mode requires an .aot section");
            let aot_len = self.section_len(aot);
            standard.push(SymbolDecl {
                name: "aot".to_owned(),
                size: aot_len,
                section: aot,
                source: AddressSource::SectionStart(aot),
                is_function: false,
            });
            standard.push(SymbolDecl {
                name: "aot_end".to_owned(),
                size: 0,
                section: aot,
                source: AddressSource::SectionEnd(aot),
                is_function: false,
            });
        }
        // 常备符号排在调用方符号之前
        standard.append(&mut self.symbols);
        self.symbols = standard;
    }

    /// 生成符号表字节，返回 (字符串表, 符号表)
    fn emit_symbols(&self) -> (Vec<u8>, Vec<u8>) {
        let mut names = StringTableBuilder::new();
        let mut symtab = vec![0u8; self.class.sym_size() as usize]; // STN_UNDEF
        for sym in &self.symbols {
            let name_off = names.intern(&sym.name);
            let st_type = if sym.is_function { STT_FUNC } else { STT_OBJECT };
            let st_info = (STB_GLOBAL << 4) | st_type;
            let st_shndx = sym.section.0 as u16;
            match self.class {
                ElfClass::Elf32 => {
                    push_u32(&mut symtab, name_off);
                    push_u32(&mut symtab, 0); // st_value，布局后回填
                    push_u32(&mut symtab, sym.size as u32);
                    symtab.push(st_info);
                    symtab.push(0);
                    push_u16(&mut symtab, st_shndx);
                }
                ElfClass::Elf64 => {
                    push_u32(&mut symtab, name_off);
                    symtab.push(st_info);
                    symtab.push(0);
                    push_u16(&mut symtab, st_shndx);
                    push_u64(&mut symtab, 0); // st_value，布局后回填
                    push_u64(&mut symtab, sym.size as u64);
                }
            }
        }
        (names.as_bytes().to_vec(), symtab)
    }

    /// SysV `.hash` 节：用于动态链接的符号查找，与类哈希表无关
    fn emit_hash(&self) -> Vec<u8> {
        let sym_count = self.symbols.len() + 1;
        let nbucket = sym_count as u32;
        let nchain = sym_count as u32;
        let mut buckets = vec![0u32; nbucket as usize];
        let mut chains = vec![0u32; nchain as usize];
        for (i, sym) in self.symbols.iter().enumerate() {
            let sym_idx = (i + 1) as u32;
            let bucket = (elf_hash(sym.name.as_bytes()) % nbucket) as usize;
            chains[sym_idx as usize] = buckets[bucket];
            buckets[bucket] = sym_idx;
        }
        let mut out = Vec::with_capacity((2 + buckets.len() + chains.len()) * 4);
        push_u32(&mut out, nbucket);
        push_u32(&mut out, nchain);
        for b in buckets {
            push_u32(&mut out, b);
        }
        for c in chains {
            push_u32(&mut out, c);
        }
        out
    }

    fn build_aot(&mut self) {
        let hash_id = self.section_by_name(".hash").unwrap();
        let dynstr_id = self.section_by_name(".dynstr").unwrap();
        let dynsym_id = self.section_by_name(".dynsym").unwrap();
        self.symtab_section = Some(dynsym_id);

        let (dynstr, dynsym) = self.emit_symbols();
        let dynstr_len = dynstr.len() as u64;
        self.sections[dynstr_id.0].data = dynstr;
        self.sections[dynsym_id.0].data = dynsym;
        self.sections[hash_id.0].data = self.emit_hash();
        self.sections[hash_id.0].link = dynsym_id.0 as u32;
        self.sections[dynsym_id.0].link = dynstr_id.0 as u32;
        self.sections[dynsym_id.0].info = 1;

        // `.dynamic`：地址类表项先写占位值并登记补丁
        let dyn_align = self.class.word_size() as u64;
        let mut dynamic = Vec::new();
        let entries: [(u64, Option<AddressSource>, u64); 6] = [
            (DT_HASH, Some(AddressSource::SectionStart(hash_id)), 0),
            (DT_STRTAB, Some(AddressSource::SectionStart(dynstr_id)), 0),
            (DT_SYMTAB, Some(AddressSource::SectionStart(dynsym_id)), 0),
            (DT_STRSZ, None, dynstr_len),
            (DT_SYMENT, None, self.class.sym_size()),
            (DT_NULL, None, 0),
        ];
        for (index, (tag, source, value)) in entries.iter().enumerate() {
            push_word(&mut dynamic, self.class, *tag);
            push_word(&mut dynamic, self.class, *value);
            if let Some(source) = source {
                self.dyn_patches.push(DynPatch {
                    entry_index: index,
                    source: *source,
                });
            }
        }
        let dynamic_id = self.push_section(
            ".dynamic",
            SHT_DYNAMIC,
            SHF_ALLOC | SHF_WRITE,
            dyn_align,
            self.class.dyn_size(),
            dynamic,
        );
        self.sections[dynamic_id.0].link = dynstr_id.0 as u32;

        let shstrtab_id = self.make_shstrtab();

        let got_id = self.section_by_name(".aot_got");
        let text_id = self.section_by_name(".text").unwrap();

        // 分段布局。第一个加载段从文件偏移 0 开始，覆盖 ELF 头与程序头。
        let phnum = if got_id.is_some() { 5u64 } else { 4u64 };
        let header_size = self.class.ehdr_size() + phnum * self.class.phdr_size();
        self.off_cursor = header_size;
        self.addr_cursor = header_size;

        self.begin_load_segment(PF_R);
        self.settle_section(hash_id);
        self.settle_section(dynstr_id);
        self.settle_section(dynsym_id);
        for index in 1..self.sections.len() {
            let s = &self.sections[index];
            let is_meta = matches!(s.sh_type, SHT_HASH | SHT_DYNSYM | SHT_DYNAMIC)
                || s.name == ".dynstr"
                || s.name == ".shstrtab";
            if !is_meta
                && s.flags & SHF_ALLOC != 0
                && s.flags & (SHF_WRITE | SHF_EXECINSTR) == 0
            {
                self.settle_section(SectionId(index));
            }
        }
        self.end_load_segment();

        if let Some(got_id) = got_id {
            self.begin_load_segment(PF_R | PF_W);
            self.settle_section(got_id);
            self.end_load_segment();
        }

        self.begin_load_segment(PF_R | PF_X);
        self.settle_section(text_id);
        self.end_load_segment();

        self.begin_load_segment(PF_R | PF_W);
        self.settle_section(dynamic_id);
        self.end_load_segment();

        // PT_DYNAMIC 镜像 `.dynamic` 所在区间
        let dyn_section = &self.sections[dynamic_id.0];
        self.segments.push(Segment {
            p_type: PT_DYNAMIC,
            flags: PF_R | PF_W,
            offset: dyn_section.offset,
            vaddr: dyn_section.addr,
            filesz: dyn_section.data.len() as u64,
            memsz: dyn_section.data.len() as u64,
            align: self.class.word_size() as u64,
        });

        self.settle_section(shstrtab_id);
        self.finish_layout();
        self.resolve_deferred(dynamic_id);
    }

    fn build_jit_debug(&mut self) {
        let (strtab, symtab) = self.emit_symbols();
        let sym_size = self.class.sym_size();
        let symtab_id = self.push_section(".symtab", SHT_SYMTAB, 0, 8, sym_size, symtab);
        let strtab_id = self.push_section(".strtab", SHT_STRTAB, 0, 1, 0, strtab);
        self.sections[symtab_id.0].link = strtab_id.0 as u32;
        self.sections[symtab_id.0].info = 1;
        self.symtab_section = Some(symtab_id);
        self.make_shstrtab();

        // 无段：从 ELF 头之后线性排布
        self.off_cursor = self.class.ehdr_size();
        for index in 1..self.sections.len() {
            self.settle_section(SectionId(index));
        }
        self.finish_layout();
        self.resolve_symbols();
    }

    fn make_shstrtab(&mut self) -> SectionId {
        let mut names = StringTableBuilder::new();
        // `.shstrtab` 自身的名字也要进表
        let mut offsets: Vec<u32> = Vec::with_capacity(self.sections.len() + 1);
        for section in &self.sections {
            offsets.push(names.intern(&section.name));
        }
        let own_off = names.intern(".shstrtab");
        let id = self.push_section(".shstrtab", SHT_STRTAB, 0, 1, 0, names.as_bytes().to_vec());
        for (section, off) in self.sections.iter_mut().zip(offsets) {
            section.name_off = off;
        }
        self.sections[id.0].name_off = own_off;
        id
    }

    fn begin_load_segment(&mut self, flags: u32) {
        debug_assert!(self.mode == ElfMode::Aot, "segments only exist in aot mode");
        debug_assert!(self.open_segment.is_none(), "segment scope already open");
        let (offset, vaddr) = if self.segments.is_empty() {
            // 第一个加载段覆盖 ELF 头与程序头，从偏移 0 开始
            (0, 0)
        } else {
            self.off_cursor = align_u64(self.off_cursor, PAGE_SIZE);
            self.addr_cursor = align_u64(self.addr_cursor, PAGE_SIZE);
            (self.off_cursor, self.addr_cursor)
        };
        self.segments.push(Segment {
            p_type: PT_LOAD,
            flags,
            offset,
            vaddr,
            filesz: 0,
            memsz: 0,
            align: PAGE_SIZE,
        });
        self.open_segment = Some(self.segments.len() - 1);
    }

    fn end_load_segment(&mut self) {
        let index = self.open_segment.take().expect("no open segment scope");
        let segment = &mut self.segments[index];
        segment.filesz = self.off_cursor - segment.offset;
        segment.memsz = self.addr_cursor - segment.vaddr;
    }

    /// 为一个节分配文件偏移（以及分配型节的虚拟地址）并推进游标
    ///
    /// 分配型节只允许在段作用域内落位（AOT 模式）；JitDebug 模式
    /// 没有段，任何节都直接线性落位。
    fn settle_section(&mut self, id: SectionId) {
        let allocated = self.sections[id.0].flags & SHF_ALLOC != 0;
        match self.mode {
            ElfMode::Aot => debug_assert!(
                !allocated || self.open_segment.is_some(),
                "allocated section {:?} settled outside a segment scope",
                self.sections[id.0].name
            ),
            ElfMode::JitDebug => debug_assert!(self.open_segment.is_none()),
        }
        let align = self.sections[id.0].align.max(1);
        self.off_cursor = align_u64(self.off_cursor, align);
        let len = self.sections[id.0].data.len() as u64;
        self.sections[id.0].offset = self.off_cursor;
        self.off_cursor += len;
        if allocated && self.mode == ElfMode::Aot {
            self.addr_cursor = align_u64(self.addr_cursor, align);
            self.sections[id.0].addr = self.addr_cursor;
            self.addr_cursor += len;
        }
    }

    fn finish_layout(&mut self) {
        self.shoff = align_u64(self.off_cursor, 8);
        self.file_size = self.shoff + self.sections.len() as u64 * self.class.shdr_size();
    }

    fn resolve_address(&self, source: AddressSource) -> u64 {
        match source {
            AddressSource::SectionStart(id) => self.sections[id.0].addr,
            AddressSource::SectionEnd(id) => {
                self.sections[id.0].addr + self.sections[id.0].data.len() as u64
            }
        }
    }

    /// 解析全部延迟符号地址，回填符号表里的 st_value
    fn resolve_symbols(&mut self) {
        let symtab_id = self.symtab_section.expect("symbol table not built");
        let sym_size = self.class.sym_size() as usize;
        let value_off = match self.class {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        };
        let values: Vec<u64> = self
            .symbols
            .iter()
            .map(|s| self.resolve_address(s.source))
            .collect();
        let class = self.class;
        let data = &mut self.sections[symtab_id.0].data;
        for (i, value) in values.into_iter().enumerate() {
            let base = (i + 1) * sym_size;
            patch_word(data, base + value_off, class, value);
        }
    }

    /// 解析符号并回填 `.dynamic` 的地址类表项
    fn resolve_deferred(&mut self, dynamic_id: SectionId) {
        self.resolve_symbols();
        let dyn_size = self.class.dyn_size() as usize;
        let word = self.class.word_size();
        let patches: Vec<(usize, u64)> = self
            .dyn_patches
            .iter()
            .map(|p| (p.entry_index, self.resolve_address(p.source)))
            .collect();
        let class = self.class;
        let data = &mut self.sections[dynamic_id.0].data;
        for (entry_index, value) in patches {
            patch_word(data, entry_index * dyn_size + word, class, value);
        }
    }

    /// 序列化为精确等于预计算大小的单个字节缓冲区
    pub fn write_to_vec(&self) -> Vec<u8> {
        assert!(self.built, "write before build");
        let mut out = vec![0u8; self.file_size as usize];

        let ehdr = self.emit_ehdr();
        out[..ehdr.len()].copy_from_slice(&ehdr);

        if self.mode == ElfMode::Aot {
            let phdrs = self.emit_phdrs();
            let phoff = self.class.ehdr_size() as usize;
            out[phoff..phoff + phdrs.len()].copy_from_slice(&phdrs);
        }

        for section in &self.sections[1..] {
            let start = section.offset as usize;
            out[start..start + section.data.len()].copy_from_slice(&section.data);
        }

        let shdrs = self.emit_shdrs();
        let shoff = self.shoff as usize;
        out[shoff..shoff + shdrs.len()].copy_from_slice(&shdrs);
        out
    }

    /// 写出到文件
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.write_to_vec())
    }

    fn emit_ehdr(&self) -> Vec<u8> {
        let class = self.class;
        let mut out = Vec::with_capacity(class.ehdr_size() as usize);
        out.extend_from_slice(&EI_MAG);
        out.push(match class {
            ElfClass::Elf32 => ELFCLASS32,
            ElfClass::Elf64 => ELFCLASS64,
        });
        out.push(ELFDATA2LSB);
        out.push(EV_CURRENT);
        out.push(ELFOSABI_NONE);
        out.extend_from_slice(&[0u8; 8]);
        let (e_type, phoff, phnum) = match self.mode {
            ElfMode::Aot => (ET_DYN, class.ehdr_size(), self.segments.len() as u16),
            ElfMode::JitDebug => (ET_REL, 0, 0),
        };
        push_u16(&mut out, e_type);
        push_u16(&mut out, self.arch.elf_machine());
        push_u32(&mut out, 1);
        push_word(&mut out, class, 0); // e_entry
        push_word(&mut out, class, phoff);
        push_word(&mut out, class, self.shoff);
        push_u32(&mut out, 0); // e_flags
        push_u16(&mut out, class.ehdr_size() as u16);
        push_u16(&mut out, if phnum == 0 { 0 } else { class.phdr_size() as u16 });
        push_u16(&mut out, phnum);
        push_u16(&mut out, class.shdr_size() as u16);
        push_u16(&mut out, self.sections.len() as u16);
        let shstrndx = self.sections.len() as u16 - 1;
        push_u16(&mut out, shstrndx);
        debug_assert_eq!(out.len() as u64, class.ehdr_size());
        out
    }

    fn emit_phdrs(&self) -> Vec<u8> {
        let class = self.class;
        let mut out = Vec::with_capacity(self.segments.len() * class.phdr_size() as usize);
        for segment in &self.segments {
            match class {
                ElfClass::Elf32 => {
                    push_u32(&mut out, segment.p_type);
                    push_u32(&mut out, segment.offset as u32);
                    push_u32(&mut out, segment.vaddr as u32);
                    push_u32(&mut out, segment.vaddr as u32);
                    push_u32(&mut out, segment.filesz as u32);
                    push_u32(&mut out, segment.memsz as u32);
                    push_u32(&mut out, segment.flags);
                    push_u32(&mut out, segment.align as u32);
                }
                ElfClass::Elf64 => {
                    push_u32(&mut out, segment.p_type);
                    push_u32(&mut out, segment.flags);
                    push_u64(&mut out, segment.offset);
                    push_u64(&mut out, segment.vaddr);
                    push_u64(&mut out, segment.vaddr);
                    push_u64(&mut out, segment.filesz);
                    push_u64(&mut out, segment.memsz);
                    push_u64(&mut out, segment.align);
                }
            }
        }
        out
    }

    fn emit_shdrs(&self) -> Vec<u8> {
        let class = self.class;
        let mut out = Vec::with_capacity(self.sections.len() * class.shdr_size() as usize);
        for section in &self.sections {
            push_u32(&mut out, section.name_off);
            push_u32(&mut out, section.sh_type);
            push_word(&mut out, class, section.flags);
            push_word(&mut out, class, section.addr);
            push_word(&mut out, class, section.offset);
            push_word(&mut out, class, section.data.len() as u64);
            push_u32(&mut out, section.link);
            push_u32(&mut out, section.info);
            push_word(&mut out, class, section.align);
            push_word(&mut out, class, section.entsize);
        }
        out
    }
}
