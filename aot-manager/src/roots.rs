//! 字符串引用根槽位注册表
//!
//! 编译线程把嵌在编译代码中的对象引用槽位（字符串字面量）注册进来，
//! GC 的根扫描遍并发读取。注册在锁内追加并用 release 发布计数；
//! 扫描开始时 acquire 读一次计数，整个遍历以该快照为界，
//! 因此并发追加的新条目不会被读到一半。
//!
//! 并行的 young 位标记哪些根已知引用年轻代对象，minor GC 只扫描
//! 这些根。

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

struct RootsInner {
    /// 槽位地址，只追加
    slots: Vec<usize>,
    /// 并行位掩码：第 i 位对应第 i 个根
    young_bits: Vec<u64>,
}

/// 根槽位注册表
pub struct StringRootRegistry {
    inner: RwLock<RootsInner>,
    /// 已发布的条目数；读侧以此为扫描上界
    published: AtomicUsize,
}

impl Default for StringRootRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StringRootRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RootsInner {
                slots: Vec::new(),
                young_bits: Vec::new(),
            }),
            published: AtomicUsize::new(0),
        }
    }

    /// 注册一个根槽位（编译线程调用，可并发）
    pub fn register(&self, slot: usize, is_young: bool) {
        let mut inner = self.inner.write();
        let index = inner.slots.len();
        inner.slots.push(slot);
        let word = index / 64;
        if inner.young_bits.len() <= word {
            inner.young_bits.resize(word + 1, 0);
        }
        if is_young {
            inner.young_bits[word] |= 1 << (index % 64);
        }
        // 先完成追加再发布计数
        self.published.store(index + 1, Ordering::Release);
    }

    /// 已发布的根数量
    pub fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 遍历扫描开始时已发布的全部根
    pub fn visit_roots(&self, mut visitor: impl FnMut(usize)) {
        let snapshot = self.published.load(Ordering::Acquire);
        let inner = self.inner.read();
        for &slot in &inner.slots[..snapshot] {
            visitor(slot);
        }
    }

    /// 只遍历 young 位已置位的根
    pub fn visit_young_roots(&self, mut visitor: impl FnMut(usize)) {
        let snapshot = self.published.load(Ordering::Acquire);
        let inner = self.inner.read();
        for index in 0..snapshot {
            if inner.young_bits[index / 64] & (1 << (index % 64)) != 0 {
                visitor(inner.slots[index]);
            }
        }
    }

    /// GC 周期内重算 young 位；只触及快照范围内的根
    pub fn update_young_bits(&self, mut still_young: impl FnMut(usize) -> bool) {
        let snapshot = self.published.load(Ordering::Acquire);
        let mut inner = self.inner.write();
        for index in 0..snapshot {
            let slot = inner.slots[index];
            let mask = 1u64 << (index % 64);
            if still_young(slot) {
                inner.young_bits[index / 64] |= mask;
            } else {
                inner.young_bits[index / 64] &= !mask;
            }
        }
    }
}
