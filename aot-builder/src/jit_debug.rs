//! 进程内 JIT 调试镜像
//!
//! 为单个函数生成一个最小的 ET_REL 镜像（无程序头、线性布局），
//! 注册给进程内调试器使用。

use aot_format::Arch;

use crate::elf::{AddressSource, ElfBuilder, ElfMode, SHF_ALLOC, SHF_EXECINSTR};

/// 为单个函数构建调试镜像
pub fn build_jit_debug_image(arch: Arch, method_name: &str, code: &[u8]) -> Vec<u8> {
    let mut elf = ElfBuilder::new(arch, ElfMode::JitDebug);
    let text = elf.add_section(
        ".text",
        SHF_ALLOC | SHF_EXECINSTR,
        arch.code_alignment() as u64,
        code.to_vec(),
    );
    elf.add_symbol(
        method_name,
        code.len() as u64,
        text,
        AddressSource::SectionStart(text),
        true,
    );
    elf.build();
    elf.write_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_function_image() {
        let image = build_jit_debug_image(Arch::X86_64, "Foo::add", &[0x8D, 0x04, 0x37, 0xC3]);
        assert_eq!(&image[0..4], b"\x7fELF");
        // ET_REL
        assert_eq!(u16::from_le_bytes([image[16], image[17]]), 1);
        // 方法体按原样进入镜像
        let needle = [0x8D, 0x04, 0x37, 0xC3];
        assert!(image.windows(4).any(|w| w == needle));
    }
}
