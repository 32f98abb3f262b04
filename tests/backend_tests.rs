//! End-to-end generation tests over small project models.

mod common;

use common::{config_in, module, project_with, stub_toolchain};
use makegen::backend::Backend;
use makegen::model::{If, IfableData, ModuleType, Property};
use rstest::rstest;

fn generate(project: &makegen::model::Project, dir: &std::path::Path) -> String {
    let config = config_in(dir);
    Backend::new(project, &config, stub_toolchain())
        .process()
        .expect("generation succeeds")
}

fn position(text: &str, needle: &str) -> usize {
    text.find(needle)
        .unwrap_or_else(|| panic!("expected {needle:?} in generated output"))
}

#[rstest]
fn generation_is_deterministic() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let project = project_with(vec![
        module("foo", ModuleType::StaticLibrary),
        module("bar", ModuleType::Test),
    ]);
    let first = generate(&project, tmp.path());
    let second = generate(&project, tmp.path());
    assert_eq!(first, second);
}

#[rstest]
fn all_includes_library_and_excludes_test() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let project = project_with(vec![
        module("foo", ModuleType::StaticLibrary),
        module("bar", ModuleType::Test),
    ]);
    let text = generate(&project, tmp.path());

    let all_line = text
        .lines()
        .find(|l| l.starts_with("all:"))
        .expect("all target");
    assert!(all_line.contains("$(foo_TARGET)"));
    assert!(!all_line.contains("$(bar_TARGET)"));

    let test_line = text
        .lines()
        .find(|l| l.starts_with("test:"))
        .expect("test target");
    assert_eq!(test_line, "test: $(bar_TARGET)");
}

#[rstest]
fn disabled_modules_contribute_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut ghost = module("ghost", ModuleType::Program);
    ghost.enabled = false;
    let project = project_with(vec![module("foo", ModuleType::Program), ghost]);
    let text = generate(&project, tmp.path());
    assert!(!text.contains("ghost"));
}

#[rstest]
fn module_install_without_base_lands_at_install_root() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut foo = module("foo", ModuleType::Program);
    foo.install_name = Some("foo.exe".to_owned());
    let project = project_with(vec![foo]);
    let text = generate(&project, tmp.path());

    let install_line = text
        .lines()
        .find(|l| l.starts_with("install:"))
        .expect("install target");
    assert!(install_line.contains("$(INSTALL)/foo.exe"));
    assert!(text.contains("$(INSTALL)/foo.exe: $(OUTPUT)/foo/foo | $(INSTALL)"));
}

#[rstest]
fn alias_installs_the_aliased_artefact() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let real = module("real", ModuleType::Program);
    let mut nick = module("nick", ModuleType::Alias);
    nick.files.clear();
    nick.aliased_module = Some("real".to_owned());
    nick.install_name = Some("nick.exe".to_owned());
    let project = project_with(vec![real, nick]);
    let text = generate(&project, tmp.path());
    assert!(text.contains("nick_TARGET = $(real_TARGET)"));
    assert!(text.contains("$(INSTALL)/nick.exe: $(OUTPUT)/real/real"));
}

#[rstest]
fn dangling_alias_aborts_generation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut nick = module("nick", ModuleType::Alias);
    nick.aliased_module = Some("ghost".to_owned());
    let project = project_with(vec![nick]);
    let config = config_in(tmp.path());
    let err = Backend::new(&project, &config, stub_toolchain())
        .process()
        .expect_err("dangling alias must abort");
    assert!(err.to_string().contains("ghost"));
    // No partial output file is left behind.
    assert!(!config.makefile.as_std_path().exists());
}

#[rstest]
fn variable_marker_in_module_base_is_a_configuration_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut bad = module("bad", ModuleType::Program);
    bad.base = "lib/$(ARCH)".into();
    let project = project_with(vec![bad]);
    let config = config_in(tmp.path());
    let err = Backend::new(&project, &config, stub_toolchain())
        .process()
        .expect_err("variable path must abort");
    assert!(err.to_string().contains("variable references"));
}

#[rstest]
fn sections_appear_in_contract_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut foo = module("foo", ModuleType::Program);
    foo.install_name = Some("foo.exe".to_owned());
    let project = project_with(vec![foo, module("bar", ModuleType::Test)]);
    let text = generate(&project, tmp.path());

    let header = position(&text, "# THIS FILE IS AUTOMATICALLY GENERATED");
    let globals = position(&text, "PREFIX :=");
    let object_macros = position(&text, "foo_OBJS =");
    let target_macros = position(&text, "foo_TARGET =");
    let all = position(&text, "all:");
    let init = position(&text, "INIT =");
    let rules = position(&text, "foo_precondition");
    let install = position(&text, "\ninstall:");
    let test = position(&text, "\ntest:");
    let dirs = position(&text, "$(INTERMEDIATE)/foo: | $(INTERMEDIATE)");

    assert!(header < globals);
    assert!(globals < object_macros);
    assert!(object_macros < target_macros);
    assert!(target_macros < all);
    assert!(all < init);
    assert!(init < rules);
    assert!(rules < install);
    assert!(install < test);
    assert!(test < dirs);
}

#[rstest]
fn global_conditionals_nest_in_guards() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut project = project_with(vec![module("foo", ModuleType::Program)]);
    project.non_if_data = IfableData {
        includes: vec!["include".to_owned()],
        properties: vec![Property {
            name: "ARCH".to_owned(),
            value: "i386".to_owned(),
        }],
        ifs: vec![If {
            property: "ARCH".to_owned(),
            value: "i386".to_owned(),
            data: IfableData {
                defines: vec!["ARCH_I386".to_owned()],
                ..IfableData::default()
            },
        }],
        ..IfableData::default()
    };
    let text = generate(&project, tmp.path());
    assert!(text.contains("ARCH := i386"));
    assert!(text.contains("PROJECT_CFLAGS = -Iinclude"));
    assert!(text.contains("ifeq (\"$(ARCH)\",\"i386\")\nPROJECT_CFLAGS += -DARCH_I386\nendif"));
}

#[rstest]
fn registry_install_block_uses_model_sources_and_fixed_hives() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut project = project_with(vec![module("foo", ModuleType::Program)]);
    project.registry_source_files = vec!["bootdata/hivesys.inf".to_owned()];
    let text = generate(&project, tmp.path());

    assert!(text.contains("install_registry: $(INSTALL)/system32/config/default"));
    for hive in ["default", "sam", "security", "software", "system"] {
        assert!(text.contains(&format!("$(INSTALL)/system32/config/{hive}")));
    }
    assert!(text.contains("$(MKHIVE_TARGET) $(INSTALL)/system32/config bootdata/hivesys.inf"));
    // The physical config directory is part of the install tree.
    assert!(
        config_in(tmp.path())
            .roots
            .install
            .join("system32/config")
            .as_std_path()
            .is_dir()
    );
}

#[rstest]
fn build_tools_populate_init() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let project = project_with(vec![
        module("mkhive", ModuleType::BuildTool),
        module("foo", ModuleType::Program),
    ]);
    let text = generate(&project, tmp.path());
    assert!(text.contains("INIT = $(OUTPUT)/mkhive/mkhive"));
}

#[rstest]
fn sources_in_subdirectories_get_distinct_objects_and_directories() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut foo = module("foo", ModuleType::Program);
    foo.files = vec!["a/x.c".into(), "b/x.c".into()];
    let project = project_with(vec![foo]);
    let text = generate(&project, tmp.path());

    assert!(text.contains("$(INTERMEDIATE)/foo/a/x.o: foo/a/x.c | $(INTERMEDIATE)/foo/a"));
    assert!(text.contains("$(INTERMEDIATE)/foo/b/x.o: foo/b/x.c | $(INTERMEDIATE)/foo/b"));
    // The subdirectories have their own mkdir rules and exist on disk.
    assert!(text.contains("$(INTERMEDIATE)/foo/a: | $(INTERMEDIATE)/foo"));
    let config = config_in(tmp.path());
    assert!(config.roots.intermediate.join("foo/a").as_std_path().is_dir());
    assert!(config.roots.intermediate.join("foo/b").as_std_path().is_dir());
}

#[rstest]
fn install_root_is_created_even_without_install_subdirectories() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut foo = module("foo", ModuleType::Program);
    foo.install_name = Some("foo.exe".to_owned());
    let project = project_with(vec![foo]);
    let config = config_in(tmp.path());
    generate(&project, tmp.path());
    // The install tree has no child directories, but the install rule's
    // order-only prerequisite is the bare root, so it must exist.
    assert!(config.roots.install.as_std_path().is_dir());
}

#[rstest]
fn physical_trees_are_created_before_rules_reference_them() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let project = project_with(vec![module("foo", ModuleType::Program)]);
    let config = config_in(tmp.path());
    generate(&project, tmp.path());
    assert!(config.roots.intermediate.join("foo").as_std_path().is_dir());
    assert!(config.roots.output.join("foo").as_std_path().is_dir());
}
