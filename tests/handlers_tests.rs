//! Unit tests for per-module generation strategies.

mod common;

use common::{module, project_with};
use makegen::emitter::MakefileEmitter;
use makegen::handlers::{HandlerError, ModuleHandler, emit_cflags_macro};
use makegen::model::{If, IfableData, ModuleType};
use rstest::rstest;

#[rstest]
#[case(ModuleType::Program, true)]
#[case(ModuleType::StaticLibrary, true)]
#[case(ModuleType::DynamicLibrary, true)]
#[case(ModuleType::KernelModeDriver, true)]
#[case(ModuleType::BuildTool, true)]
#[case(ModuleType::ObjectLibrary, false)]
#[case(ModuleType::BootSector, false)]
#[case(ModuleType::Iso, false)]
#[case(ModuleType::LiveIso, false)]
#[case(ModuleType::Test, false)]
#[case(ModuleType::Alias, false)]
fn all_target_membership_policy(#[case] module_type: ModuleType, #[case] included: bool) {
    let m = module("m", module_type);
    assert_eq!(ModuleHandler::for_module(&m).include_in_all(), included);
}

#[rstest]
fn object_and_target_macros_are_named_after_the_module() {
    let m = module("foo", ModuleType::Program);
    let handler = ModuleHandler::for_module(&m);
    assert_eq!(handler.object_macro(), "foo_OBJS");
    assert_eq!(handler.target_macro(), "foo_TARGET");
}

#[rstest]
fn object_files_live_under_the_intermediate_root() {
    let m = module("foo", ModuleType::Program);
    let handler = ModuleHandler::for_module(&m);
    assert_eq!(handler.object_files(), vec!["$(INTERMEDIATE)/foo/main.o"]);
}

#[rstest]
fn object_paths_keep_source_subdirectories() {
    let mut m = module("foo", ModuleType::Program);
    m.files = vec!["a/x.c".into(), "b/x.c".into()];
    let handler = ModuleHandler::for_module(&m);
    // Same stem in different subdirectories must not collapse onto one
    // object path.
    assert_eq!(
        handler.object_files(),
        vec!["$(INTERMEDIATE)/foo/a/x.o", "$(INTERMEDIATE)/foo/b/x.o"]
    );
    assert_eq!(handler.object_directories(), vec!["foo/a", "foo/b"]);
}

#[rstest]
fn static_library_artefact_uses_archive_naming() {
    let m = module("crt", ModuleType::StaticLibrary);
    let handler = ModuleHandler::for_module(&m);
    assert_eq!(handler.target_file(), "$(OUTPUT)/crt/libcrt.a");
}

#[rstest]
fn install_path_without_base_joins_the_install_root() {
    let mut m = module("foo", ModuleType::Program);
    m.install_name = Some("foo.exe".to_owned());
    m.install_base = None;
    let handler = ModuleHandler::for_module(&m);
    assert_eq!(
        handler.install_file_path().as_deref(),
        Some("$(INSTALL)/foo.exe")
    );
}

#[rstest]
fn install_path_with_base_adds_the_base_segment() {
    let mut m = module("foo", ModuleType::Program);
    m.install_name = Some("foo.exe".to_owned());
    m.install_base = Some("system32".to_owned());
    let handler = ModuleHandler::for_module(&m);
    assert_eq!(
        handler.install_file_path().as_deref(),
        Some("$(INSTALL)/system32/foo.exe")
    );
}

#[rstest]
fn alias_target_macro_forwards_to_the_aliased_module() {
    let real = module("real", ModuleType::Program);
    let mut alias = module("nick", ModuleType::Alias);
    alias.files.clear();
    alias.aliased_module = Some("real".to_owned());
    let project = project_with(vec![real, alias]);

    let binding = project.modules[1].clone();
    let handler = ModuleHandler::for_module(&binding);
    let mut emitter = MakefileEmitter::new();
    handler
        .generate_target_macro(&mut emitter, &project)
        .expect("alias resolves");
    assert_eq!(emitter.as_str(), "nick_TARGET = $(real_TARGET)\n");
}

#[rstest]
fn dangling_alias_is_a_fatal_error() {
    let mut alias = module("nick", ModuleType::Alias);
    alias.aliased_module = Some("ghost".to_owned());
    let project = project_with(vec![alias]);

    let binding = project.modules[0].clone();
    let handler = ModuleHandler::for_module(&binding);
    let mut emitter = MakefileEmitter::new();
    let err = handler
        .generate_target_macro(&mut emitter, &project)
        .expect_err("dangling alias must fail");
    assert!(matches!(err, HandlerError::DanglingAlias { .. }));
}

#[rstest]
fn unknown_invocation_tool_is_a_fatal_error() {
    let mut m = module("gen", ModuleType::Program);
    m.invocations.push(makegen::model::Invocation {
        tool: "missing-tool".to_owned(),
        args: vec!["-x".to_owned()],
        outputs: vec!["gen.c".into()],
    });
    let project = project_with(vec![m]);

    let binding = project.modules[0].clone();
    let handler = ModuleHandler::for_module(&binding);
    let mut emitter = MakefileEmitter::new();
    let err = handler
        .generate_invocations(&mut emitter, &project)
        .expect_err("unknown tool must fail");
    assert!(matches!(err, HandlerError::UnknownInvocationTool { .. }));
}

#[rstest]
fn cflags_macro_preserves_order_and_wraps_conditions() {
    let data = IfableData {
        includes: vec!["include".to_owned()],
        defines: vec!["NDEBUG".to_owned()],
        compiler_flags: vec!["-O2".to_owned()],
        properties: Vec::new(),
        ifs: vec![If {
            property: "ARCH".to_owned(),
            value: "i386".to_owned(),
            data: IfableData {
                defines: vec!["ARCH_I386".to_owned()],
                ifs: vec![If {
                    property: "DBG".to_owned(),
                    value: "1".to_owned(),
                    data: IfableData {
                        compiler_flags: vec!["-g".to_owned()],
                        ..IfableData::default()
                    },
                }],
                ..IfableData::default()
            },
        }],
    };
    let mut emitter = MakefileEmitter::new();
    emit_cflags_macro(&mut emitter, "foo_CFLAGS", "=", &data);
    let expected = concat!(
        "foo_CFLAGS = -Iinclude -DNDEBUG -O2\n",
        "ifeq (\"$(ARCH)\",\"i386\")\n",
        "foo_CFLAGS += -DARCH_I386\n",
        "ifeq (\"$(DBG)\",\"1\")\n",
        "foo_CFLAGS += -g\n",
        "endif\n\n",
        "endif\n\n",
    );
    assert_eq!(emitter.as_str(), expected);
}
