// Shared build-script helper: stage a crate's README.md into OUT_DIR so the
// crate root can pull it in with
// `#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]`.
//
// Include from a crate's build.rs with: include!("../build_helper.rs");
// The including file must `use std::{env, fs, path::Path};`.

/// Copy README.md into OUT_DIR, rewriting intra-repo source links so rustdoc
/// resolves them as module links instead of dead file paths.
fn stage_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");

    let readme = Path::new(crate_dir).join("README.md");
    let Ok(content) = fs::read_to_string(&readme) else {
        return;
    };

    let rewritten = content.replace("](src/", "](").replace(".rs)", ")");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    fs::write(Path::new(&out_dir).join("README.md"), rewritten).expect("write staged README");
}
