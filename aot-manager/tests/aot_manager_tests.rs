//! 产物构建 → 落盘 → 注册 → 查找的端到端测试
//!
//! 构建侧用 aot-builder 写出真实的 ELF 产物文件，加载侧经由
//! AotManager / AotFile 走完整的打开、校验、按类与方法 id 查找路径。

use std::path::{Path, PathBuf};

use aot_builder::{AotBuilder, ArtifactOptions, CompiledMethod, GotSlotKind};
use aot_format::{Arch, GcKind, descriptor_hash};
use aot_manager::{AotFile, AotLoadError, AotManager, OpenOptions};

const CMDLINE: &str = "paoc --paoc-panda-files foo.abc --paoc-output foo.an";
/// `lea eax, [rdi + rsi]; ret` —— add(2, 3) == 5
const ADD_CODE: [u8; 4] = [0x8D, 0x04, 0x37, 0xC3];

fn base_options(arch: Arch) -> ArtifactOptions {
    ArtifactOptions {
        arch,
        gc_kind: GcKind::Stw,
        environment_checksum: 0xC0FF_EE00,
        boot_image: false,
        with_cha: false,
        class_context: "a.abc*HASH1".to_owned(),
        intrinsic_slots: 4,
    }
}

/// 单文件单类两方法的标准产物
fn build_simple_artifact(output: &Path, options: ArtifactOptions) {
    let arch = options.arch;
    let mut builder = AotBuilder::new(options);
    builder.start_file("foo.abc", 0xAB12);
    builder.start_class(1, 0x40, 2);
    builder.add_method(CompiledMethod::new(
        arch,
        Some(10),
        0,
        vec![0xC3],
        vec![1, 2, 3],
    ));
    builder.add_method(CompiledMethod::new(
        arch,
        Some(11),
        1,
        ADD_CODE.to_vec(),
        vec![4, 5],
    ));
    builder.end_class();
    builder.add_class_hash_table(&[("LFoo;", 0x40)]);
    builder.end_file();
    builder.write(CMDLINE, output).unwrap();
}

fn artifact_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn test_roundtrip_single_class_two_methods() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "foo.an");
    build_simple_artifact(&path, base_options(Arch::X86_64));

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    assert_eq!(manager.files_count(), 1);

    let file = manager.get_file(&path.to_string_lossy()).unwrap();
    assert_eq!(file.cmdline(), CMDLINE);
    assert_eq!(file.recorded_file_name(), path.to_string_lossy());
    assert_eq!(file.files_count(), 1);
    assert_eq!(file.arch(), Arch::X86_64);
    assert_eq!(file.gc_kind(), GcKind::Stw);
    assert_eq!(file.class_context(), "a.abc*HASH1");
    assert!(!file.is_boot());
    assert!(!file.with_cha());

    let (_, source) = file.find_source_file("foo.abc").unwrap();
    assert_eq!(source.file_checksum, 0xAB12);
    assert_eq!(source.classes_count, 1);
    assert_eq!(source.methods_count, 2);

    let class = file.find_class(&source, 1).unwrap();
    assert_eq!(class.container_offset, 0x40);
    assert_eq!(class.methods_count, 2);

    let first = file.method_code_entry(&class, 0);
    assert_eq!(first.method_id, 10);
    assert_eq!(file.method_code(&first), [0xC3]);
    assert_eq!(file.method_code_info(&first), [1, 2, 3]);

    let second = file.method_code_entry(&class, 1);
    assert_eq!(second.method_id, 11);
    assert_eq!(file.method_code(&second), ADD_CODE);
    assert_eq!(file.method_code_info(&second), [4, 5]);

    // 哈希表路径与二分查找路径一致
    assert_eq!(file.find_class_by_descriptor(&source, "LFoo;"), Some(0x40));
    assert_eq!(file.find_class_by_descriptor(&source, "LBar;"), None);

    let summary = file.summary();
    assert_eq!(summary.classes, 1);
    assert_eq!(summary.methods, 2);
}

#[test]
fn test_two_source_files_with_disjoint_classes() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "two.an");
    let arch = Arch::Arm64;
    let mut builder = AotBuilder::new(base_options(arch));

    builder.start_file("a.abc", 1);
    builder.start_class(5, 0x10, 1);
    builder.add_method(CompiledMethod::new(arch, Some(50), 0, vec![0xC3; 4], vec![]));
    builder.end_class();
    builder.add_class_hash_table(&[("LA;", 0x10)]);
    builder.end_file();

    builder.start_file("b.abc", 2);
    builder.start_class(7, 0x20, 1);
    builder.add_method(CompiledMethod::new(arch, Some(70), 0, vec![0xC3; 8], vec![]));
    builder.end_class();
    builder.add_class_hash_table(&[("LB;", 0x20)]);
    builder.end_file();

    builder.write(CMDLINE, &path).unwrap();

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    let file = manager.get_file(&path.to_string_lossy()).unwrap();
    assert_eq!(file.files_count(), 2);

    let a = manager.find_source_file("a.abc").unwrap();
    assert_eq!(a.file.class_headers(&a.header).len(), 1);
    assert_eq!(a.file.class_headers(&a.header)[0].class_id, 5);
    assert_eq!(a.file.find_class_by_descriptor(&a.header, "LA;"), Some(0x10));

    let b = manager.find_source_file("b.abc").unwrap();
    assert_eq!(b.file.class_headers(&b.header)[0].class_id, 7);
    assert!(manager.find_source_file("c.abc").is_none());
}

#[test]
fn test_gc_kind_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "epsilon.an");
    let mut options = base_options(Arch::X86_64);
    options.gc_kind = GcKind::Epsilon;
    build_simple_artifact(&path, options);

    let mut manager = AotManager::new();
    let err = manager
        .add_file(&path, GcKind::Stw, false, None)
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("epsilon"), "{message}");
    assert!(message.contains("stw"), "{message}");
    // 失败的产物不应出现在注册表里
    assert!(manager.get_file(&path.to_string_lossy()).is_none());
    assert_eq!(manager.files_count(), 0);
}

#[test]
fn test_environment_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "env.an");
    build_simple_artifact(&path, base_options(Arch::X86_64));

    let err = AotFile::open(
        &path,
        &OpenOptions {
            expected_gc: GcKind::Stw,
            expected_environment_checksum: Some(0xDEAD),
        },
    )
    .unwrap_err();
    assert!(matches!(err, AotLoadError::EnvironmentMismatch { .. }));
}

#[test]
fn test_add_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "idem.an");
    build_simple_artifact(&path, base_options(Arch::X86_64));

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    assert_eq!(manager.files_count(), 1);
}

#[test]
fn test_class_without_compiled_methods_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "dropped.an");
    let arch = Arch::X86_64;
    let mut builder = AotBuilder::new(base_options(arch));

    builder.start_file("mixed.abc", 3);
    // 全部方法都是 abstract / native：一个都没编译出来
    builder.start_class(2, 0x80, 4);
    builder.add_method(CompiledMethod::new(arch, None, 0, vec![0xC3], vec![]));
    builder.add_method(CompiledMethod::new(arch, Some(21), 1, Vec::new(), vec![]));
    builder.end_class();
    // 正常类，三个声明方法编译出第 0 和第 2 个
    builder.start_class(9, 0x90, 3);
    builder.add_method(CompiledMethod::new(arch, Some(90), 0, vec![0x90, 0xC3], vec![]));
    builder.add_method(CompiledMethod::new(arch, Some(92), 2, vec![0xC3], vec![]));
    builder.end_class();
    builder.add_class_hash_table(&[("LDead;", 0x80), ("LLive;", 0x90)]);
    builder.end_file();
    builder.write(CMDLINE, &path).unwrap();

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    let source = manager.find_source_file("mixed.abc").unwrap();
    let classes = source.file.class_headers(&source.header);
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].class_id, 9);
    assert!(source.file.find_class(&source.header, 2).is_none());

    // 位图反映声明的 3 个方法中第 0、2 个被编译
    let bitmap = source.file.bitmap(&classes[0]);
    assert_eq!(bitmap.bit_len(), 3);
    assert!(bitmap.get(0));
    assert!(!bitmap.get(1));
    assert!(bitmap.get(2));
}

#[test]
fn test_class_headers_sorted_for_binary_search() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "sorted.an");
    let arch = Arch::X86_64;
    let mut builder = AotBuilder::new(base_options(arch));

    builder.start_file("many.abc", 4);
    let mut descriptors: Vec<(String, u32)> = Vec::new();
    for (order, class_id) in [44u32, 11, 33, 22, 55].into_iter().enumerate() {
        builder.start_class(class_id, class_id * 2, 1);
        builder.add_method(CompiledMethod::new(
            arch,
            Some(class_id * 10),
            0,
            vec![0xC3; order + 1],
            vec![],
        ));
        builder.end_class();
        descriptors.push((format!("LC{class_id};"), class_id * 2));
    }
    let refs: Vec<(&str, u32)> = descriptors.iter().map(|(s, o)| (s.as_str(), *o)).collect();
    builder.add_class_hash_table(&refs);
    builder.end_file();
    builder.write(CMDLINE, &path).unwrap();

    let file = AotFile::open(
        &path,
        &OpenOptions {
            expected_gc: GcKind::Stw,
            expected_environment_checksum: None,
        },
    )
    .unwrap();
    let (_, source) = file.find_source_file("many.abc").unwrap();
    let classes = file.class_headers(&source);
    let ids: Vec<u32> = classes.iter().map(|c| c.class_id).collect();
    assert_eq!(ids, [11, 22, 33, 44, 55]);
    // 每个类经二分查找可达，方法 id 对应
    for id in ids {
        let class = file.find_class(&source, id).unwrap();
        let method = file.method_code_entry(&class, 0);
        assert_eq!(method.method_id, id * 10);
    }
    // 哈希表大小为不小于 5 的 2 的幂
    let table = file.class_hash_table(&source);
    assert_eq!(table.len(), 8);
    for (descriptor, offset) in &descriptors {
        let hash = descriptor_hash(descriptor);
        assert!(table.iter().any(|e| e.descriptor_hash == hash && e.container_offset == *offset));
    }
}

#[test]
fn test_got_initializer_runs_on_registration() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "got.an");
    let arch = Arch::X86_64;
    let mut options = base_options(arch);
    options.intrinsic_slots = 2;
    let mut builder = AotBuilder::new(options);
    builder.got_mut().slot_offset(GotSlotKind::StaticCall, 0, 7);
    builder.start_file("foo.abc", 1);
    builder.start_class(1, 0x40, 1);
    builder.add_method(CompiledMethod::new(arch, Some(10), 0, vec![0xC3], vec![]));
    builder.end_class();
    builder.end_file();
    builder.write(CMDLINE, &path).unwrap();

    let mut manager = AotManager::new();
    let mut primed = false;
    let mut initializer = |file: &mut AotFile| {
        let got = file.got_bytes_mut().unwrap();
        got[..8].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        primed = true;
    };
    manager
        .add_file(&path, GcKind::Stw, false, Some(&mut initializer))
        .unwrap();
    assert!(primed);

    let file = manager.get_file(&path.to_string_lossy()).unwrap();
    let got = file.got_bytes().unwrap();
    assert_eq!(got.len() % 0x1000, 0);
    assert_eq!(&got[..8], &0x1122_3344_5566_7788u64.to_le_bytes());
}

#[test]
fn test_class_hierarchy_subset_check_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "subset.an");
    build_simple_artifact(&path, base_options(Arch::X86_64));

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    // 当前上下文是超集，非 CHA 产物允许
    manager.set_app_class_context("a.abc*HASH1:b.abc*HASH2");
    assert!(manager.check_class_hierarchy().is_ok());
    manager.verify_class_hierarchy();

    // 记录项完全缺失时不兼容
    manager.set_app_class_context("b.abc*HASH2");
    assert!(manager.check_class_hierarchy().is_err());
}

#[test]
#[should_panic(expected = "class context mismatch")]
fn test_class_hierarchy_cha_prefix_check_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "cha.an");
    let mut options = base_options(Arch::X86_64);
    options.with_cha = true;
    build_simple_artifact(&path, options);

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    // 上下文内容相同但顺序不同：不再是前缀，CHA 检查必须失败
    manager.set_app_class_context("b.abc*HASH2:a.abc*HASH1");
    manager.verify_class_hierarchy();
}

#[test]
fn test_cha_prefix_check_passes_on_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "cha-ok.an");
    let mut options = base_options(Arch::X86_64);
    options.with_cha = true;
    build_simple_artifact(&path, options);

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    manager.set_app_class_context("a.abc*HASH1:b.abc*HASH2");
    assert!(manager.check_class_hierarchy().is_ok());
}

#[test]
fn test_boot_artifact_checks_against_boot_context_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "boot.an");
    let mut options = base_options(Arch::X86_64);
    options.boot_image = true;
    build_simple_artifact(&path, options);

    let mut manager = AotManager::new();
    manager.add_file(&path, GcKind::Stw, false, None).unwrap();
    manager.set_boot_class_context("a.abc*HASH1");
    // 应用上下文与 boot 产物无关
    manager.set_app_class_context("zzz.abc*OTHER");
    assert!(manager.check_class_hierarchy().is_ok());
}

#[test]
fn test_elf32_artifact_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact_path(&dir, "arm.an");
    build_simple_artifact(&path, base_options(Arch::Arm));

    let file = AotFile::open(
        &path,
        &OpenOptions {
            expected_gc: GcKind::Stw,
            expected_environment_checksum: Some(0xC0FF_EE00),
        },
    )
    .unwrap();
    assert_eq!(file.arch(), Arch::Arm);
    let (_, source) = file.find_source_file("foo.abc").unwrap();
    let class = file.find_class(&source, 1).unwrap();
    let second = file.method_code_entry(&class, 1);
    assert_eq!(file.method_code(&second), ADD_CODE);
}
