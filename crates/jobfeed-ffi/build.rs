extern crate cbindgen;

use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    let output_file = PathBuf::from(&crate_dir).join("include").join("jobfeed.h");

    if let Some(include_dir) = output_file.parent() {
        std::fs::create_dir_all(include_dir).expect("create include directory");
    }

    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("JOBFEED_H")
        .with_header("/* Generated by cbindgen. Do not edit. */")
        .generate()
        .expect("Unable to generate bindings")
        .write_to_file(output_file);
}
