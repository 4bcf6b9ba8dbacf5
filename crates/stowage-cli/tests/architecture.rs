use std::path::{Path, PathBuf};

use arch_lint::rules::{NoErrorSwallowing, NoSilentResultDrop};
use arch_lint::{Analyzer, Severity};

/// The one place allowed to call into libc: signalling the server process.
const UNSAFE_ALLOWED: &str = "crates/stowage-runtime/src/bootstrap.rs";

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root")
        .to_path_buf()
}

/// Non-test Rust sources of every stowage crate, relative to the root.
fn library_sources(root: &Path) -> Vec<(String, String)> {
    walkdir::WalkDir::new(root.join("crates"))
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("rs"))
        .filter(|e| e.path().components().all(|c| c.as_os_str() != "tests"))
        .map(|e| {
            let rel = e.path().strip_prefix(root).expect("under root");
            let text = std::fs::read_to_string(e.path()).expect("read rust file");
            (rel.to_string_lossy().replace('\\', "/"), text)
        })
        .collect()
}

/// Code lines only; doc examples and comments may unwrap.
fn code_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
}

/// AL003 (no-error-swallowing) and AL013 (no-silent-result-drop). A
/// deliberate `.ok()` carries an `arch-lint: allow` with its reason.
#[test]
fn errors_are_propagated_or_annotated() {
    let analyzer = Analyzer::builder()
        .root(workspace_root())
        .exclude("**/target/**")
        .exclude("**/tests/**")
        .exclude("examples/**")
        .rule(NoErrorSwallowing::new())
        .rule(NoSilentResultDrop::new())
        .build()
        .expect("build analyzer");

    let result = analyzer.analyze().expect("analyze");
    if result.has_violations_at(Severity::Warning) {
        panic!("{}", result.format_test_report(Severity::Warning));
    }
}

#[test]
fn library_code_never_unwraps() {
    let root = workspace_root();
    let offenders: Vec<String> = library_sources(&root)
        .iter()
        .flat_map(|(path, text)| {
            code_lines(text)
                .filter(|(_, line)| line.contains(".unwrap()") || line.contains(".expect("))
                .map(move |(n, line)| format!("{path}:{n}: {}", line.trim()))
                .collect::<Vec<_>>()
        })
        .collect();

    assert!(offenders.is_empty(), "unwrap/expect outside tests:\n{}", offenders.join("\n"));
}

#[test]
fn unsafe_is_confined_to_process_signalling() {
    let root = workspace_root();
    let offenders: Vec<String> = library_sources(&root)
        .into_iter()
        .filter(|(path, text)| {
            path != UNSAFE_ALLOWED && code_lines(text).any(|(_, line)| line.contains("unsafe {"))
        })
        .map(|(path, _)| path)
        .collect();

    assert!(offenders.is_empty(), "unsafe code in {offenders:?}");
}
