//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_upload_minimal() {
    match parse(&[
        "relup",
        "upload",
        "--release-version",
        "1.4.0",
        "--platform",
        "linux-x86_64",
        "app.tar.gz",
    ]) {
        CliCommand::Upload {
            release_version,
            platform,
            jobs,
            store,
            files,
        } => {
            assert_eq!(release_version, "1.4.0");
            assert_eq!(platform, "linux-x86_64");
            assert!(jobs.is_none());
            assert!(store.is_none());
            assert_eq!(files, vec![PathBuf::from("app.tar.gz")]);
        }
        _ => panic!("expected Upload"),
    }
}

#[test]
fn cli_parse_upload_all_flags_keeps_file_order() {
    match parse(&[
        "relup",
        "upload",
        "--release-version",
        "2.0.0",
        "--platform",
        "windows",
        "--jobs",
        "4",
        "--store",
        "/srv/releases",
        "b.zip",
        "a.zip",
        "c.sig",
    ]) {
        CliCommand::Upload {
            jobs, store, files, ..
        } => {
            assert_eq!(jobs, Some(4));
            assert_eq!(store, Some(PathBuf::from("/srv/releases")));
            assert_eq!(
                files,
                vec![
                    PathBuf::from("b.zip"),
                    PathBuf::from("a.zip"),
                    PathBuf::from("c.sig")
                ]
            );
        }
        _ => panic!("expected Upload with flags"),
    }
}

#[test]
fn cli_upload_requires_files_and_target() {
    assert!(Cli::try_parse_from([
        "relup",
        "upload",
        "--release-version",
        "1.0",
        "--platform",
        "linux"
    ])
    .is_err());
    assert!(Cli::try_parse_from(["relup", "upload", "--platform", "linux", "a.bin"]).is_err());
    assert!(Cli::try_parse_from([
        "relup",
        "upload",
        "--release-version",
        "1.0",
        "--platform",
        "linux",
        "--jobs",
        "many",
        "a.bin"
    ])
    .is_err());
}

#[test]
fn cli_parse_checksum() {
    match parse(&["relup", "checksum", "/path/to/file.bin"]) {
        CliCommand::Checksum { path } => assert_eq!(path, PathBuf::from("/path/to/file.bin")),
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_parse_config() {
    assert!(matches!(parse(&["relup", "config"]), CliCommand::Config));
}
