use std::fs;
use std::path::{Path, PathBuf};

use bst_reconcile::config::{DescriptorSettings, MasterLocation};
use bst_reconcile::descriptor::{self, RwMode};
use bst_reconcile::ErrorKind;

const MASTER: &str = r#"<?xml version="1.0"?>
<VirtualBox>
  <MediaRegistry>
    <HardDisks>
      <HardDisk uuid="{fb}" location="fastboot.vdi" format="VDI" Type="Readonly"/>
      <HardDisk uuid="{root}" location="Root.vhd" format="VHD" Type="Readonly"/>
      <HardDisk uuid="{data}" location="Data.vhdx" format="VHDX" Type="Normal"/>
    </HardDisks>
  </MediaRegistry>
</VirtualBox>
"#;

const LOCAL: &str = "<Machine name=\"Pie64\">\r\n\
  <HardDisk location=\"..\\Pie64\\fastboot.vdi\" Type=\"Readonly\"/>\r\n\
  <HardDisk location=\"Data.vhdx\" Type=\"Normal\"/>\r\n\
</Machine>\r\n";

fn sandbox(root: &Path) -> PathBuf {
    let dir = root.join("Engine").join("Pie64");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Android.bstk.in"), MASTER).unwrap();
    fs::write(dir.join("Pie64.bstk"), LOCAL).unwrap();
    fs::write(dir.join("Pie64.bstk-prev"), LOCAL).unwrap();
    dir
}

#[test]
fn read_only_until_switched_to_normal() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = sandbox(tmp.path());
    let settings = DescriptorSettings::default();

    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadOnly);

    let report = descriptor::write_mode(&dir, &settings, RwMode::ReadWrite).unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.files_changed.len(), 2);
    assert_eq!(report.lines_changed, 3);
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadWrite);

    let master = fs::read_to_string(dir.join("Android.bstk.in")).unwrap();
    assert!(master.contains(r#"location="fastboot.vdi" format="VDI" Type="Normal"/>"#));
    assert!(master.contains(r#"location="Root.vhd" format="VHD" Type="Normal"/>"#));
    // Lines not referencing a target disk are left alone.
    assert!(master.contains(r#"location="Data.vhdx" format="VHDX" Type="Normal"/>"#));

    // Files outside the pattern are never touched.
    assert_eq!(fs::read_to_string(dir.join("Pie64.bstk-prev")).unwrap(), LOCAL);
}

#[test]
fn toggling_back_restores_original_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = sandbox(tmp.path());
    let settings = DescriptorSettings::default();

    descriptor::write_mode(&dir, &settings, RwMode::ReadWrite).unwrap();
    descriptor::write_mode(&dir, &settings, RwMode::ReadOnly).unwrap();

    assert_eq!(fs::read_to_string(dir.join("Android.bstk.in")).unwrap(), MASTER);
    assert_eq!(fs::read_to_string(dir.join("Pie64.bstk")).unwrap(), LOCAL);
}

#[test]
fn writing_current_mode_changes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = sandbox(tmp.path());
    let settings = DescriptorSettings::default();

    let report = descriptor::write_mode(&dir, &settings, RwMode::ReadOnly).unwrap();
    assert_eq!(report.lines_changed, 0);
    assert!(report.files_changed.is_empty());
}

#[test]
fn one_read_only_line_anywhere_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = sandbox(tmp.path());
    let settings = DescriptorSettings::default();
    fs::write(
        dir.join("Android.bstk.in"),
        MASTER.replace(r#"Type="Readonly""#, r#"Type="Normal""#),
    )
    .unwrap();

    // The instance-local descriptor still says Readonly.
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadOnly);
}

#[test]
fn missing_directory_or_descriptors() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = DescriptorSettings::default();
    let missing = tmp.path().join("Engine").join("Ghost");

    assert_eq!(descriptor::read_mode(&missing, &settings), RwMode::Unknown);
    let err = descriptor::write_mode(&missing, &settings, RwMode::ReadWrite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let empty = tmp.path().join("Engine").join("Empty");
    fs::create_dir_all(&empty).unwrap();
    assert_eq!(descriptor::read_mode(&empty, &settings), RwMode::Unknown);
    let err = descriptor::write_mode(&empty, &settings, RwMode::ReadOnly).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn descriptors_without_target_lines_are_unknown() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("Pie64");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Pie64.bstk"), "<HardDisk location=\"Data.vhdx\" Type=\"Normal\"/>\n").unwrap();

    assert_eq!(
        descriptor::read_mode(&dir, &DescriptorSettings::default()),
        RwMode::Unknown
    );
}

#[test]
fn unknown_mode_is_rejected_before_touching_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = sandbox(tmp.path());

    let err = descriptor::write_mode(&dir, &DescriptorSettings::default(), RwMode::Unknown)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(fs::read_to_string(dir.join("Pie64.bstk")).unwrap(), LOCAL);
}

#[test]
fn master_in_engine_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = tmp.path().join("Engine");
    let dir = engine.join("Pie64");
    fs::create_dir_all(&dir).unwrap();
    fs::write(engine.join("Android.bstk.in"), MASTER).unwrap();
    let settings = DescriptorSettings {
        master_location: MasterLocation::Engine,
        ..DescriptorSettings::default()
    };

    assert_eq!(descriptor::master_path(&dir, &settings), engine.join("Android.bstk.in"));
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadOnly);
    descriptor::write_mode(&dir, &settings, RwMode::ReadWrite).unwrap();
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadWrite);
}

#[test]
fn only_the_mode_token_changes_on_a_line() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("Nougat64");
    fs::create_dir_all(&dir).unwrap();
    let line = "    <Image location=\"Nougat64\\fastboot.vdi\" Type=\"Readonly\"  autoReset=\"false\" />\n";
    fs::write(dir.join("Nougat64.bstk"), line).unwrap();

    descriptor::write_mode(&dir, &DescriptorSettings::default(), RwMode::ReadWrite).unwrap();
    assert_eq!(
        fs::read_to_string(dir.join("Nougat64.bstk")).unwrap(),
        line.replace("fastboot.vdi\" Type=\"Readonly\"", "fastboot.vdi\" Type=\"Normal\"")
    );
}

#[test]
fn target_line_without_token_gains_one() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("Pie64");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Pie64.bstk"), "<HardDisk location=\"Root.vhd\"/>\n").unwrap();
    let settings = DescriptorSettings::default();

    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadWrite);
    descriptor::write_mode(&dir, &settings, RwMode::ReadOnly).unwrap();
    assert_eq!(
        fs::read_to_string(dir.join("Pie64.bstk")).unwrap(),
        "<HardDisk location=\"Root.vhd\" Type=\"Readonly\"/>\n"
    );
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadOnly);
}

#[test]
fn foreign_type_value_is_replaced_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("Pie64");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("Pie64.bstk"),
        "<HardDisk location=\"Root.vhd\" Type=\"Immutable\"/>\n",
    )
    .unwrap();
    let settings = DescriptorSettings::default();

    descriptor::write_mode(&dir, &settings, RwMode::ReadOnly).unwrap();
    assert_eq!(
        fs::read_to_string(dir.join("Pie64.bstk")).unwrap(),
        "<HardDisk location=\"Root.vhd\" Type=\"Readonly\"/>\n"
    );
    assert_eq!(descriptor::read_mode(&dir, &settings), RwMode::ReadOnly);
}
