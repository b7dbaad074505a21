//! 目标架构与 GC 类型标签
//!
//! 产物头中以 `u32` 标签记录目标架构和 GC 类型，加载时必须与
//! 当前运行环境一致。

use std::fmt;
use thiserror::Error;

/// 标签解析错误
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Unknown architecture tag: {0}")]
    UnknownArch(u32),
    #[error("Unknown gc-type tag: {0}")]
    UnknownGcKind(u32),
}

/// 目标架构 (x86_64=1, ARM64=2, RISCV64=3, ARM=4, X86=5)
///
/// X86 只是合法的头部标签，产物构建不支持它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Arch {
    X86_64 = 1,
    Arm64 = 2,
    RiscV64 = 3,
    Arm = 4,
    X86 = 5,
}

impl Arch {
    /// 头部标签值
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// 从头部标签解析
    pub fn from_tag(tag: u32) -> Result<Self, TagError> {
        match tag {
            1 => Ok(Arch::X86_64),
            2 => Ok(Arch::Arm64),
            3 => Ok(Arch::RiscV64),
            4 => Ok(Arch::Arm),
            5 => Ok(Arch::X86),
            other => Err(TagError::UnknownArch(other)),
        }
    }

    /// 代码段中方法记录的起始对齐
    pub fn code_alignment(self) -> u32 {
        match self {
            Arch::Arm | Arch::X86 => 8,
            _ => 16,
        }
    }

    /// 指针宽度（字节）
    pub fn pointer_size(self) -> u32 {
        match self {
            Arch::Arm | Arch::X86 => 4,
            _ => 8,
        }
    }

    pub fn is_64bit(self) -> bool {
        self.pointer_size() == 8
    }

    /// ELF 头中的 e_machine 值
    pub fn elf_machine(self) -> u16 {
        match self {
            Arch::X86_64 => 62,  // EM_X86_64
            Arch::Arm64 => 183,  // EM_AARCH64
            Arch::RiscV64 => 243, // EM_RISCV
            Arch::Arm => 40,     // EM_ARM
            Arch::X86 => 3,      // EM_386
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
            Arch::RiscV64 => "riscv64",
            Arch::Arm => "arm",
            Arch::X86 => "x86",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GC 类型 (stw=1, epsilon=2, gen-gc=3)
///
/// 产物只能被配置了相同 GC 类型的运行时加载。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GcKind {
    Stw = 1,
    Epsilon = 2,
    GenGc = 3,
}

impl GcKind {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Result<Self, TagError> {
        match tag {
            1 => Ok(GcKind::Stw),
            2 => Ok(GcKind::Epsilon),
            3 => Ok(GcKind::GenGc),
            other => Err(TagError::UnknownGcKind(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GcKind::Stw => "stw",
            GcKind::Epsilon => "epsilon",
            GcKind::GenGc => "gen-gc",
        }
    }
}

impl fmt::Display for GcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
