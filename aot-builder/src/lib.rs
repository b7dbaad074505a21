//! AOT 产物构建器
//!
//! 把逐方法的机器码和编译元数据（stack map / safepoint / code-info）
//! 组装成单个可重定位的 ELF 格式产物，并生成供加载器按类 / 方法 id
//! 定位编译结果的辅助头部区域。
//!
//! ## 主要功能
//!
//! - **多架构支持**: x86-64, ARM64, RISC-V64（ELF64）以及 ARM（ELF32）
//! - **两种布局模式**: 完整产物模式与进程内 JIT 调试模式
//! - **分层累积**: 文件 → 类 → 方法，带丢弃规则与类头重排
//! - **类哈希索引**: 每个源文件一张开放寻址哈希表，加载侧 O(1) 查类
//! - **间接寻址表**: GOT 式负偏移槽位，地址在布局完成后统一解析
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use aot_builder::{AotBuilder, ArtifactOptions, CompiledMethod};
//! use aot_format::{Arch, GcKind};
//!
//! let mut builder = AotBuilder::new(ArtifactOptions {
//!     arch: Arch::X86_64,
//!     gc_kind: GcKind::Stw,
//!     environment_checksum: 0,
//!     boot_image: false,
//!     with_cha: false,
//!     class_context: String::new(),
//!     intrinsic_slots: 0,
//! });
//!
//! builder.start_file("foo.abc", 0x1234);
//! builder.start_class(1, 0x20, 1);
//! builder.add_method(CompiledMethod::new(
//!     Arch::X86_64,
//!     Some(7),
//!     0,
//!     vec![0x90, 0xC3],
//!     Vec::new(),
//! ));
//! builder.end_class();
//! builder.add_class_hash_table(&[("LFoo;", 0x20)]);
//! builder.end_file();
//! builder.write("paoc --compile foo.abc", "foo.an".as_ref())?;
//! # Ok::<(), aot_builder::AotBuilderError>(())
//! ```

mod accumulator;
pub mod elf;
pub mod got;
mod jit_debug;

pub use accumulator::{AotBuilder, AotBuilderError, ArtifactOptions, BuildStats, CompiledMethod};
pub use elf::{AddressSource, ElfBuilder, ElfClass, ElfMode, SectionId};
pub use got::{GotSlotKind, GotTableBuilder};
pub use jit_debug::build_jit_debug_image;
