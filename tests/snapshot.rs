use std::{fs, path::Path};

use catalyst::snapshot::{
    DEFAULT_SOURCE_EXTENSIONS, dump_base_experiment_code, dump_code, replace_dir,
};

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn base_code_keeps_earlier_snapshots() {
    let root = tempfile::tempdir().unwrap();
    let src = root.path().join("exp");
    let dst = root.path().join("logs");
    write(&src.join("config.json"), "{}");
    write(&src.join("model.rs"), "struct Model;");
    write(&src.join("notes.txt"), "not copied");
    write(&src.join("nested/deep.rs"), "not copied either");

    let first = dump_base_experiment_code(&src, &dst, DEFAULT_SOURCE_EXTENSIONS).unwrap();
    assert_eq!(first, dst.join("code"));

    let mut copied: Vec<_> = fs::read_dir(&first)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    copied.sort();
    assert_eq!(copied, ["config.json", "model.rs"]);

    let second = dump_base_experiment_code(&src, &dst, &["txt"]).unwrap();
    let name = second.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("code-"), "{name}");
    assert!(second.join("notes.txt").is_file());
    assert!(first.join("model.rs").is_file());
}

#[test]
fn dump_code_replaces_previous_copies() {
    let root = tempfile::tempdir().unwrap();
    let expdir = root.path().join("my_exp");
    let framework = root.path().join("framework");
    let logdir = root.path().join("logs");
    write(&expdir.join("config.json"), "{}");
    write(&framework.join("src/lib.rs"), "// framework");
    write(&logdir.join("code/my_exp/stale.rs"), "old");

    dump_code(&expdir, &logdir, &framework).unwrap();

    let code = logdir.join("code");
    assert!(code.join("my_exp/config.json").is_file());
    assert!(code.join("framework/src/lib.rs").is_file());
    assert!(!code.join("my_exp/stale.rs").exists());
}

#[test]
fn replace_dir_copies_trees() {
    let root = tempfile::tempdir().unwrap();
    let from = root.path().join("from");
    let to = root.path().join("to");
    write(&from.join("a/b/c.json"), "[]");
    write(&to.join("old.json"), "[]");

    replace_dir(&from, &to).unwrap();

    assert_eq!(fs::read_to_string(to.join("a/b/c.json")).unwrap(), "[]");
    assert!(!to.join("old.json").exists());
}

#[test]
fn missing_source_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let res = dump_base_experiment_code(
        &root.path().join("missing"),
        root.path(),
        DEFAULT_SOURCE_EXTENSIONS,
    );
    assert!(res.is_err());
}
