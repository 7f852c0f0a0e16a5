fn main() -> anyhow::Result<()> {
    let counts = (1_000..=9_000).step_by(4_000);
    docbench_model::generate_corpora(counts)?;
    Ok(())
}
