//! AOT 产物加载与管理
//!
//! 读取侧：把 `aot-builder` 写出的 ELF 产物加载进内存、校验与当前
//! 运行环境的兼容性，并提供按类 / 方法 id 的结构化查找。
//!
//! ## 主要功能
//!
//! - **产物读取器** [`AotFile`]: 打开、校验（魔数 / 版本 / GC 类型 /
//!   环境校验和）、定长偏移访问器、类头二分查找、类哈希表查找
//! - **产物注册表** [`AotManager`]: 进程级目录，按产物名幂等注册、
//!   按源文件名哈希查找、类层次兼容性校验（CHA 前缀 / 子集两种模式）
//! - **根槽位注册表** [`StringRootRegistry`]: 编译代码中对象引用
//!   槽位的并发注册与 GC 根扫描

mod elf_view;
mod reader;
mod registry;
mod roots;

pub use elf_view::{ElfView, ElfViewError, SectionRange};
pub use reader::{AotFile, AotLoadError, ArtifactSummary, OpenOptions};
pub use registry::{AotManager, SourceFileRef};
pub use roots::StringRootRegistry;
