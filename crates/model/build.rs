const PROJECT_NAME: &str = "docbench";
const CORPUS_DIR_ENV: &str = "CORPUS_DIR";

fn main() {
    let out_dir = scratch::path(PROJECT_NAME);
    println!("cargo::rustc-env={CORPUS_DIR_ENV}={}", out_dir.display());
}
