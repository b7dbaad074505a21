//! GOT 式间接寻址表
//!
//! 一张按指针宽度打包的槽位表，紧贴在代码段之前，编译后的方法
//! 通过相对单一锚点（内在函数区末尾）的小负偏移引用槽位，
//! 不需要每方法的重定位记录。
//!
//! 表尾是每个运行时内在函数一个字的内在区；其余条目在编译期按
//! `(源文件, 实体 id)` 分配负偏移，写出时统一解析进字节缓冲：
//! `diff = 总字数 - 内在函数数`，类型标签写在 `diff + 偏移`，
//! 载荷（实体 id）写在标签前的固定位移处。页对齐产生的填充
//! 全部吸收在低下标一侧，保证末尾锚点不动。

use std::collections::HashMap;

use aot_format::Arch;

/// 加载段页大小，表字节数向上取整到它的倍数
const GOT_PAGE_SIZE: u64 = 0x1000;

/// 槽位类型标签（写入表中的字）
pub const SLOT_TAG_STATIC_CALL: u64 = 1;
pub const SLOT_TAG_VIRTUAL_INDEX: u64 = 2;
pub const SLOT_TAG_CLASS: u64 = 3;
pub const SLOT_TAG_STRING: u64 = 4;
pub const SLOT_TAG_INLINE_CACHE: u64 = 5;
pub const SLOT_TAG_COMMON: u64 = 6;

/// 六种逻辑槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GotSlotKind {
    /// 静态调用目标：`[实体 id, 运行时回填的入口地址, 标签]`
    StaticCall,
    /// 虚方法序号：`[序号载荷, 标签]`
    VirtualIndex,
    /// 类引用：`[实体 id, 标签]`
    ClassRef,
    /// 字符串引用：`[实体 id, 标签]`
    StringRef,
    /// 接口内联缓存：`[标签]`
    InlineCache,
    /// 通用槽：`[标签]`
    Common,
}

impl GotSlotKind {
    /// 该类型一个条目占用的字数
    pub fn slot_words(self) -> u64 {
        match self {
            GotSlotKind::StaticCall => 3,
            GotSlotKind::VirtualIndex | GotSlotKind::ClassRef | GotSlotKind::StringRef => 2,
            GotSlotKind::InlineCache | GotSlotKind::Common => 1,
        }
    }

    fn tag(self) -> u64 {
        match self {
            GotSlotKind::StaticCall => SLOT_TAG_STATIC_CALL,
            GotSlotKind::VirtualIndex => SLOT_TAG_VIRTUAL_INDEX,
            GotSlotKind::ClassRef => SLOT_TAG_CLASS,
            GotSlotKind::StringRef => SLOT_TAG_STRING,
            GotSlotKind::InlineCache => SLOT_TAG_INLINE_CACHE,
            GotSlotKind::Common => SLOT_TAG_COMMON,
        }
    }

    /// 载荷相对标签的负位移（字），无载荷返回 `None`
    fn payload_back(self) -> Option<u64> {
        match self {
            GotSlotKind::StaticCall => Some(2),
            GotSlotKind::VirtualIndex | GotSlotKind::ClassRef | GotSlotKind::StringRef => Some(1),
            GotSlotKind::InlineCache | GotSlotKind::Common => None,
        }
    }
}

/// 间接寻址表构建器
///
/// 编译期间分配槽位，`fill` 在全部方法累积完成、布局确定之后执行。
#[derive(Debug)]
pub struct GotTableBuilder {
    intrinsic_count: u64,
    /// 已分配区向下生长的游标（非正数）
    cursor: i64,
    slots: HashMap<(GotSlotKind, u32, u32), i64>,
}

impl GotTableBuilder {
    pub fn new(intrinsic_count: u32) -> Self {
        Self {
            intrinsic_count: intrinsic_count as u64,
            cursor: 0,
            slots: HashMap::new(),
        }
    }

    /// 取 `(kind, file_id, entity_id)` 的槽位负偏移，首次调用时分配
    ///
    /// 返回的偏移指向条目的标签字，相对内在函数区起始（表末尾锚点）。
    pub fn slot_offset(&mut self, kind: GotSlotKind, file_id: u32, entity_id: u32) -> i64 {
        if let Some(&offset) = self.slots.get(&(kind, file_id, entity_id)) {
            return offset;
        }
        let offset = self.cursor - 1;
        self.cursor -= kind.slot_words() as i64;
        self.slots.insert((kind, file_id, entity_id), offset);
        offset
    }

    /// 已分配条目占用的字数
    pub fn allocated_words(&self) -> u64 {
        (-self.cursor) as u64
    }

    pub fn intrinsic_count(&self) -> u64 {
        self.intrinsic_count
    }

    pub fn entry_count(&self) -> usize {
        self.slots.len()
    }

    /// 表的最小字数：内在函数区 + 已分配区 + 终结槽
    fn min_table_words(&self) -> u64 {
        self.intrinsic_count + self.allocated_words() + 1
    }

    /// 页对齐后的表字节数
    pub fn table_bytes(&self, arch: Arch) -> u64 {
        let word = arch.pointer_size() as u64;
        let min = self.min_table_words() * word;
        (min + GOT_PAGE_SIZE - 1) & !(GOT_PAGE_SIZE - 1)
    }

    /// 解析全部槽位并生成表的字节内容
    ///
    /// 内在函数区与运行时回填的地址槽写 0，由加载侧的初始化回调填充。
    pub fn fill(&self, arch: Arch) -> Vec<u8> {
        let word = arch.pointer_size() as usize;
        let total_words = self.table_bytes(arch) / word as u64;
        let diff = (total_words - self.intrinsic_count) as i64;
        let mut table = vec![0u64; total_words as usize];
        for (&(kind, _file_id, entity_id), &offset) in &self.slots {
            let index = (diff + offset) as usize;
            table[index] = kind.tag();
            if let Some(back) = kind.payload_back() {
                table[index - back as usize] = entity_id as u64;
            }
        }
        let mut out = Vec::with_capacity(table.len() * word);
        for value in table {
            match word {
                4 => out.extend_from_slice(&(value as u32).to_le_bytes()),
                _ => out.extend_from_slice(&value.to_le_bytes()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_word(bytes: &[u8], index: usize) -> u64 {
        u64::from_le_bytes(bytes[index * 8..index * 8 + 8].try_into().unwrap())
    }

    #[test]
    fn test_slot_allocation_is_idempotent() {
        let mut got = GotTableBuilder::new(4);
        let a = got.slot_offset(GotSlotKind::StaticCall, 0, 17);
        let b = got.slot_offset(GotSlotKind::StaticCall, 0, 17);
        assert_eq!(a, b);
        assert_eq!(got.allocated_words(), 3);
        let c = got.slot_offset(GotSlotKind::StringRef, 0, 17);
        assert_ne!(a, c);
        assert_eq!(got.allocated_words(), 5);
    }

    #[test]
    fn test_slot_packing_is_dense() {
        let mut got = GotTableBuilder::new(0);
        assert_eq!(got.slot_offset(GotSlotKind::StaticCall, 0, 1), -1);
        assert_eq!(got.slot_offset(GotSlotKind::ClassRef, 0, 2), -4);
        assert_eq!(got.slot_offset(GotSlotKind::Common, 0, 3), -6);
        assert_eq!(got.allocated_words(), 6);
    }

    #[test]
    fn test_table_rounds_to_page() {
        let got = GotTableBuilder::new(2);
        assert_eq!(got.table_bytes(Arch::X86_64), 0x1000);
        assert_eq!(got.table_bytes(Arch::Arm), 0x1000);
    }

    #[test]
    fn test_fill_places_tag_and_payload() {
        let mut got = GotTableBuilder::new(3);
        let call = got.slot_offset(GotSlotKind::StaticCall, 1, 0x55);
        let string = got.slot_offset(GotSlotKind::StringRef, 1, 0x66);
        let cache = got.slot_offset(GotSlotKind::InlineCache, 1, 0x77);

        let bytes = got.fill(Arch::X86_64);
        assert_eq!(bytes.len() as u64, got.table_bytes(Arch::X86_64));
        let words = bytes.len() / 8;
        let diff = words as i64 - 3;

        let call_idx = (diff + call) as usize;
        assert_eq!(read_word(&bytes, call_idx), SLOT_TAG_STATIC_CALL);
        assert_eq!(read_word(&bytes, call_idx - 2), 0x55);
        // 运行时回填的地址槽保持为 0
        assert_eq!(read_word(&bytes, call_idx - 1), 0);

        let string_idx = (diff + string) as usize;
        assert_eq!(read_word(&bytes, string_idx), SLOT_TAG_STRING);
        assert_eq!(read_word(&bytes, string_idx - 1), 0x66);

        let cache_idx = (diff + cache) as usize;
        assert_eq!(read_word(&bytes, cache_idx), SLOT_TAG_INLINE_CACHE);

        // 内在函数区在表末尾，初始为 0
        for i in diff as usize..words {
            assert_eq!(read_word(&bytes, i), 0);
        }
    }

    #[test]
    fn test_fill_32bit_words() {
        let mut got = GotTableBuilder::new(1);
        let offset = got.slot_offset(GotSlotKind::Common, 0, 9);
        let bytes = got.fill(Arch::Arm);
        let words = bytes.len() / 4;
        let diff = words as i64 - 1;
        let index = (diff + offset) as usize;
        let value = u32::from_le_bytes(bytes[index * 4..index * 4 + 4].try_into().unwrap());
        assert_eq!(value as u64, SLOT_TAG_COMMON);
    }
}
