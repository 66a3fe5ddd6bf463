//! End-to-end tests that master a real image with xorriso.
//!
//! These tests are `#[ignore]` by default because they require `xorrisofs`
//! and `implantisomd5` on the host.
//!
//! Run with: `cargo test --test e2e -- --ignored`

use isomer_core::{Engine, EngineOptions};
use isomer_runtime::XorrisoBackend;
use isomer_schema::{load_flavor_config, ValidateOptions};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn prereqs_available(checksum: bool) -> bool {
    let missing = isomer_runtime::check_mastering_prereqs(checksum);
    if !missing.is_empty() {
        let msg = isomer_runtime::format_missing(&missing);
        assert!(
            std::env::var("CI").is_err(),
            "CI FATAL: E2E prerequisites missing, tests cannot silently skip in CI.\n{msg}"
        );
        eprintln!("skipping E2E: missing prerequisites: {msg}");
        return false;
    }
    true
}

fn minimal_source(dir: &Path) {
    fs::create_dir_all(dir.join("EFI/BOOT")).unwrap();
    fs::create_dir_all(dir.join("docs")).unwrap();
    fs::write(dir.join("README"), "isomer e2e\n").unwrap();
    fs::write(dir.join("docs/notes.txt"), "excluded\n").unwrap();
}

fn build(flavor_src: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    minimal_source(&source);
    let flavor_path = dir.path().join("e2e.cfg");
    fs::write(&flavor_path, flavor_src).unwrap();
    let flavor = load_flavor_config(&flavor_path, &ValidateOptions::default()).unwrap();

    let outfile = dir.path().join("e2e.iso");
    let engine = Engine::new(
        &source,
        &outfile,
        EngineOptions {
            working: None,
            quiet: true,
        },
        Arc::new(XorrisoBackend::new()),
    )
    .unwrap();
    engine.generate(&flavor, |_| {}).unwrap();
    (dir, outfile)
}

/// Master a data-only image (no boot catalog) and check the volume label.
#[test]
#[ignore = "requires xorrisofs"]
fn e2e_master_plain_image() {
    if !prereqs_available(false) {
        return;
    }

    let (_dir, outfile) = build(
        "volume_id = 'ISOMER_E2E'\nefi_boot = False\nchecksum = False\nexclude = 'docs'\n\
         grub_template = 'menuentry {volume_id!r} {{}}\\n'\n",
    );

    let image = fs::read(&outfile).unwrap();
    // Primary volume descriptor at sector 16; the label starts at byte 40.
    let label = &image[16 * 2048 + 40..16 * 2048 + 40 + 10];
    assert_eq!(label, b"ISOMER_E2E");
}

/// Embed a media checksum into the image.
#[test]
#[ignore = "requires xorrisofs and implantisomd5"]
fn e2e_master_with_checksum() {
    if !prereqs_available(true) {
        return;
    }

    let (_dir, outfile) = build("volume_id = 'ISOMER_MD5'\nefi_boot = False\n");
    let image = fs::read(&outfile).unwrap();
    // implantisomd5 stores its record in the application-use area of the PVD.
    let app_use = &image[16 * 2048 + 883..16 * 2048 + 883 + 512];
    let text = String::from_utf8_lossy(app_use);
    assert!(text.contains("ISO MD5SUM"));
}
