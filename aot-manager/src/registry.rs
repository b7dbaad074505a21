//! 产物注册表
//!
//! 进程级的已加载产物目录：按产物文件名幂等注册、按源文件名
//! 哈希查找，以及类层次兼容性校验。生命周期显式：运行时启动时
//! 构造一个实例并传引用给各调用方，没有隐藏的全局单例。
//!
//! 类上下文是 `path*checksum` 逐项冒号拼接的字符串。产物如果用了
//! 类层次分析（CHA）优化，它记录的上下文必须是当前上下文的精确
//! 前缀——任何偏离（包括追加）都会使内联决策失效；否则只要求
//! 记录的每一项都出现在当前上下文里。校验失败是致命错误：在
//! 不兼容的类层次上继续执行 CHA 优化代码会静默产出错误结果。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

use aot_format::{FileHeader, GcKind};
use tracing::{debug, error, info};

use crate::reader::{AotFile, AotLoadError, OpenOptions};
use crate::roots::StringRootRegistry;

/// 注册表中一个源文件的定位
#[derive(Debug, Clone, Copy)]
struct SourceFileSlot {
    file_index: usize,
    header_index: usize,
}

/// 源文件访问器：产物引用加上该源文件的头
pub struct SourceFileRef<'a> {
    pub file: &'a AotFile,
    pub header: FileHeader,
}

/// 产物注册表
pub struct AotManager {
    files: Vec<AotFile>,
    source_index: HashMap<String, SourceFileSlot>,
    boot_class_context: String,
    app_class_context: String,
    string_roots: StringRootRegistry,
}

impl Default for AotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AotManager {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            source_index: HashMap::new(),
            boot_class_context: String::new(),
            app_class_context: String::new(),
            string_roots: StringRootRegistry::new(),
        }
    }

    /// 运行时当前加载的 boot 文件上下文
    pub fn set_boot_class_context(&mut self, context: &str) {
        self.boot_class_context = context.to_owned();
    }

    /// 运行时当前加载的应用文件上下文
    pub fn set_app_class_context(&mut self, context: &str) {
        self.app_class_context = context.to_owned();
    }

    /// 注册一个产物文件
    ///
    /// 同名产物已注册时幂等返回成功。打开成功后把其中每个源文件
    /// 登记进查找表：已有同名源文件时默认先注册者保留，`force`
    /// 则覆盖。`initializer` 在登记前调用，用于填充间接寻址表的
    /// 内在函数槽位并对齐运行时地址。
    pub fn add_file(
        &mut self,
        path: &Path,
        gc_kind: GcKind,
        force: bool,
        initializer: Option<&mut dyn FnMut(&mut AotFile)>,
    ) -> Result<(), AotLoadError> {
        let name = path.to_string_lossy();
        if self.files.iter().any(|f| f.file_name() == name) {
            debug!(file = %name, "aot artifact already registered");
            return Ok(());
        }
        let options = OpenOptions {
            expected_gc: gc_kind,
            expected_environment_checksum: None,
        };
        let mut file = AotFile::open(path, &options)?;
        if let Some(initializer) = initializer {
            initializer(&mut file);
        }

        let file_index = self.files.len();
        for header_index in 0..file.files_count() {
            let header = file.file_header(header_index);
            let source_name = file.string(header.file_name_str).to_owned();
            let slot = SourceFileSlot {
                file_index,
                header_index,
            };
            match self.source_index.entry(source_name) {
                Entry::Vacant(entry) => {
                    entry.insert(slot);
                }
                Entry::Occupied(mut entry) => {
                    if force {
                        entry.insert(slot);
                    }
                }
            }
        }
        info!(
            file = %name,
            sources = file.files_count(),
            "aot artifact registered"
        );
        self.files.push(file);
        Ok(())
    }

    pub fn files_count(&self) -> usize {
        self.files.len()
    }

    /// 按产物文件名线性查找
    pub fn get_file(&self, name: &str) -> Option<&AotFile> {
        self.files.iter().find(|f| f.file_name() == name)
    }

    /// 按源文件名哈希查找
    pub fn find_source_file(&self, name: &str) -> Option<SourceFileRef<'_>> {
        let slot = self.source_index.get(name)?;
        let file = &self.files[slot.file_index];
        Some(SourceFileRef {
            file,
            header: file.file_header(slot.header_index),
        })
    }

    pub fn string_roots(&self) -> &StringRootRegistry {
        &self.string_roots
    }

    /// 对每个已注册产物做类层次兼容性检查，返回首个不匹配的诊断
    pub fn check_class_hierarchy(&self) -> Result<(), String> {
        for file in &self.files {
            let live_context = if file.is_boot() {
                self.boot_class_context.clone()
            } else if self.app_class_context.is_empty() {
                self.boot_class_context.clone()
            } else if self.boot_class_context.is_empty() {
                self.app_class_context.clone()
            } else {
                format!("{}:{}", self.boot_class_context, self.app_class_context)
            };
            let recorded = file.class_context();
            let compatible = if file.with_cha() {
                context_is_prefix(recorded, &live_context)
            } else {
                context_is_subset(recorded, &live_context)
            };
            if !compatible {
                return Err(class_context_diagnostic(
                    file.file_name(),
                    file.with_cha(),
                    recorded,
                    &live_context,
                ));
            }
        }
        Ok(())
    }

    /// 类层次校验，不匹配即终止进程
    pub fn verify_class_hierarchy(&self) {
        if let Err(diagnostic) = self.check_class_hierarchy() {
            error!("{diagnostic}");
            panic!("{diagnostic}");
        }
    }
}

/// CHA 产物：记录的上下文必须是当前上下文的精确前缀（按项对齐）
fn context_is_prefix(recorded: &str, live: &str) -> bool {
    if recorded.is_empty() {
        return true;
    }
    live.strip_prefix(recorded)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}

/// 非 CHA 产物：记录的每个 `path*checksum` 项都要出现在当前上下文中
fn context_is_subset(recorded: &str, live: &str) -> bool {
    if recorded.is_empty() {
        return true;
    }
    let live_tokens: std::collections::HashSet<&str> = live.split(':').collect();
    recorded.split(':').all(|token| live_tokens.contains(token))
}

/// 逐项列出期望与实际上下文的多行诊断
fn class_context_diagnostic(file: &str, with_cha: bool, recorded: &str, live: &str) -> String {
    let mode = if with_cha { "prefix (CHA)" } else { "subset" };
    let mut out = format!("Cannot use AOT file {file}: class context mismatch ({mode} check)\n");
    out.push_str("recorded at compile time:\n");
    for token in recorded.split(':').filter(|t| !t.is_empty()) {
        out.push_str("  ");
        out.push_str(token);
        out.push('\n');
    }
    out.push_str("current runtime context:\n");
    for token in live.split(':').filter(|t| !t.is_empty()) {
        out.push_str("  ");
        out.push_str(token);
        out.push('\n');
    }
    out
}
