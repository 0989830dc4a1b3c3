use std::fs;
use std::path::Path;

use bst_reconcile::conf_store::{self, RootFlag};
use bst_reconcile::config::KeySettings;
use filetime::FileTime;

const CONF: &str = "bst.instance.Nougat64.enable_root_access=\"0\"\n\
bst.instance.Pie64.enable_root_access=\"1\"\n\
bst.feature.rooting=\"1\"\n\
bst.instance.Pie64.display_name=\"Pie 64\"\n";

fn write_conf(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("bluestacks.conf");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn reads_individual_and_global_flags() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), CONF);
    let keys = KeySettings::default();

    let flags = conf_store::read_all_instance_flags(&path, &keys).unwrap();
    assert_eq!(flags.len(), 2);
    assert_eq!(flags.get("Nougat64"), Some(&false));
    assert_eq!(flags.get("Pie64"), Some(&true));
    assert!(conf_store::read_global_flag(&path, &keys).unwrap());
    assert_eq!(
        conf_store::read_instance_flag(&path, "Pie64", &keys).unwrap(),
        RootFlag::On
    );
    assert_eq!(
        conf_store::read_instance_flag(&path, "Rvc64", &keys).unwrap(),
        RootFlag::Unknown
    );
}

#[test]
fn missing_file_reads_as_unknown_and_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bluestacks.conf");
    let keys = KeySettings::default();

    assert_eq!(
        conf_store::read_instance_flag(&path, "Pie64", &keys).unwrap(),
        RootFlag::Unknown
    );
    assert!(!conf_store::read_global_flag(&path, &keys).unwrap());
    assert!(conf_store::read_all(&path, &keys).unwrap().instances.is_empty());
}

#[test]
fn writing_missing_file_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let err = conf_store::write_flag(&tmp.path().join("bluestacks.conf"), "bst.feature.rooting", "1")
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn rewrite_touches_only_the_matching_line() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), CONF);

    let changed =
        conf_store::write_flag(&path, "bst.instance.Nougat64.enable_root_access", "1").unwrap();
    assert!(changed);
    let expected = CONF.replacen(
        "bst.instance.Nougat64.enable_root_access=\"0\"",
        "bst.instance.Nougat64.enable_root_access=\"1\"",
        1,
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
}

#[test]
fn unchanged_value_leaves_file_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), CONF);
    let old = FileTime::from_unix_time(1_000_000, 0);
    filetime::set_file_mtime(&path, old).unwrap();

    let changed = conf_store::write_flag(&path, "bst.feature.rooting", "1").unwrap();
    assert!(!changed);
    let meta = fs::metadata(&path).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&meta), old);
    assert_eq!(fs::read_to_string(&path).unwrap(), CONF);
}

#[test]
fn absent_key_is_appended_with_newline_guard() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), "bst.instance.Pie64.enable_root_access=\"1\"");

    assert!(conf_store::write_flag(&path, "bst.feature.rooting", "1").unwrap());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "bst.instance.Pie64.enable_root_access=\"1\"\nbst.feature.rooting=\"1\"\n"
    );
}

#[test]
fn crlf_files_keep_their_terminators() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(
        tmp.path(),
        "bst.feature.rooting=\"0\"\r\nbst.instance.Pie64.enable_root_access=\"1\"\r\n",
    );

    assert!(conf_store::write_flag(&path, "bst.feature.rooting", "1").unwrap());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "bst.feature.rooting=\"1\"\r\nbst.instance.Pie64.enable_root_access=\"1\"\r\n"
    );
}

#[test]
fn only_first_duplicate_is_read_and_rewritten() {
    let tmp = tempfile::tempdir().unwrap();
    let text = "bst.instance.Pie64.enable_root_access=\"1\"\n\
bst.instance.Pie64.enable_root_access=\"0\"\n";
    let path = write_conf(tmp.path(), text);
    let keys = KeySettings::default();

    let snapshot = conf_store::read_all(&path, &keys).unwrap();
    assert_eq!(snapshot.instances.get("Pie64"), Some(&true));
    assert_eq!(snapshot.duplicates, vec!["bst.instance.Pie64.enable_root_access".to_string()]);

    assert!(conf_store::write_flag(&path, "bst.instance.Pie64.enable_root_access", "0").unwrap());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "bst.instance.Pie64.enable_root_access=\"0\"\n\
bst.instance.Pie64.enable_root_access=\"0\"\n"
    );
}

#[test]
fn second_identical_write_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), CONF);
    let key = "bst.instance.Pie64.enable_root_access";

    assert!(conf_store::write_flag(&path, key, "0").unwrap());
    let after_first = fs::read_to_string(&path).unwrap();
    assert!(!conf_store::write_flag(&path, key, "0").unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
}

#[test]
fn append_preserves_prior_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_conf(tmp.path(), "a=\"1\"\nb=\"0\"");

    assert!(conf_store::write_flag(&path, "key", "value").unwrap());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "a=\"1\"\nb=\"0\"\nkey=\"value\"\n"
    );
}
