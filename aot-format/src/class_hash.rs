//! 类描述符哈希表
//!
//! 每个源文件一张定长开放寻址哈希表，把类描述符的 32 位哈希映射到
//! 类在源容器中的实体偏移。表大小总是不小于类数量的 2 的幂，
//! 冲突通过线性探测加显式溢出链解决，加载侧据此做均摊 O(1) 查找。
//!
//! 空槽以 `descriptor_hash == 0` 表示，因此哈希函数不会产生 0；
//! 溢出链的 next 字段采用 `+1` 编码，原始值 0 表示链尾，
//! 编码 / 解码集中在 [`encode_chain_next`] / [`decode_chain_next`]。

use crate::header::read_u32;

/// 哈希表条目
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassHashEntry {
    /// 类描述符哈希，0 表示空槽
    pub descriptor_hash: u32,
    /// 类在源容器中的实体偏移
    pub container_offset: u32,
    /// 溢出链 next（`+1` 编码，0 = 无后继）
    pub next_pos: u32,
}

impl ClassHashEntry {
    pub const SIZE: usize = 3 * 4;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.descriptor_hash.to_le_bytes());
        out.extend_from_slice(&self.container_offset.to_le_bytes());
        out.extend_from_slice(&self.next_pos.to_le_bytes());
    }

    pub fn read_at(buf: &[u8], index: usize) -> Self {
        let base = index * Self::SIZE;
        Self {
            descriptor_hash: read_u32(buf, base),
            container_offset: read_u32(buf, base + 4),
            next_pos: read_u32(buf, base + 8),
        }
    }
}

/// 编码溢出链后继槽位
#[inline]
pub fn encode_chain_next(pos: u32) -> u32 {
    pos + 1
}

/// 解码溢出链后继槽位，原始值 0 表示链尾
#[inline]
pub fn decode_chain_next(raw: u32) -> Option<u32> {
    if raw == 0 { None } else { Some(raw - 1) }
}

/// 类描述符的 32 位 FNV-1a 哈希
///
/// 结果 0 重映射为 1，保证 0 只表示空槽。
pub fn descriptor_hash(descriptor: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811C_9DC5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for &byte in descriptor.as_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 { 1 } else { hash }
}

/// 为一个源文件的全部类构建哈希表
///
/// 第一遍只做直接落位：`pos = hash & (size - 1)`，槽位空闲则占用；
/// 发生冲突的类推迟到第二遍，从理论槽位起线性探测首个空槽落位，
/// 并追加到理论槽位的溢出链尾。类数量为 0 时返回空表。
pub fn build_class_hash_table(classes: &[(&str, u32)]) -> Vec<ClassHashEntry> {
    if classes.is_empty() {
        return Vec::new();
    }

    let size = classes.len().next_power_of_two();
    let mask = (size - 1) as u32;
    let mut table = vec![ClassHashEntry::default(); size];
    let mut deferred = Vec::new();

    for &(descriptor, container_offset) in classes {
        let hash = descriptor_hash(descriptor);
        let pos = (hash & mask) as usize;
        if table[pos].descriptor_hash == 0 {
            table[pos] = ClassHashEntry {
                descriptor_hash: hash,
                container_offset,
                next_pos: 0,
            };
        } else {
            deferred.push((hash, container_offset));
        }
    }

    for (hash, container_offset) in deferred {
        let theory_pos = (hash & mask) as usize;

        let mut actual_pos = None;
        for step in 0..size {
            let pos = (theory_pos + step) & (size - 1);
            if table[pos].descriptor_hash == 0 {
                actual_pos = Some(pos);
                break;
            }
        }
        // 表大小 >= 类数量，探测必然找到空槽
        let actual_pos = actual_pos.expect("class hash table over capacity");

        table[actual_pos] = ClassHashEntry {
            descriptor_hash: hash,
            container_offset,
            next_pos: 0,
        };

        let mut tail = theory_pos;
        while let Some(next) = decode_chain_next(table[tail].next_pos) {
            tail = next as usize;
        }
        debug_assert!(tail != actual_pos);
        table[tail].next_pos = encode_chain_next(actual_pos as u32);
    }

    table
}

/// 按描述符哈希查找类的容器偏移
///
/// 先查理论槽位，再沿溢出链逐项比较哈希，链尾未命中返回 `None`。
pub fn lookup_class(table: &[ClassHashEntry], hash: u32) -> Option<u32> {
    if table.is_empty() {
        return None;
    }
    debug_assert!(table.len().is_power_of_two());
    let mut pos = (hash & (table.len() as u32 - 1)) as usize;
    loop {
        let entry = &table[pos];
        if entry.descriptor_hash == 0 {
            return None;
        }
        if entry.descriptor_hash == hash {
            return Some(entry.container_offset);
        }
        match decode_chain_next(entry.next_pos) {
            Some(next) => pos = next as usize,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_next_encoding() {
        assert_eq!(decode_chain_next(0), None);
        assert_eq!(decode_chain_next(encode_chain_next(0)), Some(0));
        assert_eq!(decode_chain_next(encode_chain_next(41)), Some(41));
    }

    #[test]
    fn test_descriptor_hash_never_zero() {
        assert_ne!(descriptor_hash(""), 0);
        assert_ne!(descriptor_hash("LFoo;"), 0);
    }

    #[test]
    fn test_empty_input_builds_empty_table() {
        assert!(build_class_hash_table(&[]).is_empty());
    }

    #[test]
    fn test_size_is_power_of_two() {
        let classes: Vec<(String, u32)> = (0..5u32).map(|i| (format!("C{i}"), i * 8)).collect();
        let refs: Vec<(&str, u32)> = classes.iter().map(|(s, o)| (s.as_str(), *o)).collect();
        let table = build_class_hash_table(&refs);
        assert_eq!(table.len(), 8);
        let occupied = table.iter().filter(|e| e.descriptor_hash != 0).count();
        assert_eq!(occupied, 5);
    }

    #[test]
    fn test_five_classes_lookup() {
        let classes = [("A", 10), ("B", 20), ("C", 30), ("D", 40), ("E", 50)];
        let table = build_class_hash_table(&classes);
        assert_eq!(table.len(), 8);
        for (descriptor, offset) in classes {
            let hash = descriptor_hash(descriptor);
            assert_eq!(lookup_class(&table, hash), Some(offset), "class {descriptor}");
        }
        assert_eq!(lookup_class(&table, descriptor_hash("Missing")), None);
    }

    // 构造理论槽位全部相同的最坏情况，强制走探测加溢出链路径
    #[test]
    fn test_all_colliding_classes() {
        let names: Vec<String> = {
            let mut found = Vec::new();
            let mut i = 0u32;
            while found.len() < 4 {
                let name = format!("K{i}");
                if descriptor_hash(&name) & 3 == 1 {
                    found.push(name);
                }
                i += 1;
            }
            found
        };
        let classes: Vec<(&str, u32)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), (i as u32 + 1) * 100))
            .collect();
        let table = build_class_hash_table(&classes);
        assert_eq!(table.len(), 4);
        for (descriptor, offset) in &classes {
            let hash = descriptor_hash(descriptor);
            assert_eq!(lookup_class(&table, hash), Some(*offset));
        }
    }

    #[test]
    fn test_entry_serialization_roundtrip() {
        let entry = ClassHashEntry {
            descriptor_hash: 0x1234_5678,
            container_offset: 0x90,
            next_pos: encode_chain_next(3),
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf);
        assert_eq!(buf.len(), ClassHashEntry::SIZE);
        assert_eq!(ClassHashEntry::read_at(&buf, 0), entry);
    }
}
