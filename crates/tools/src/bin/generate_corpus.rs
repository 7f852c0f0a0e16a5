use clap::Parser;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    std::fs::create_dir_all(&config.data_dir)?;
    for count in config.counts.iter().copied() {
        let file_path = config.data_dir.join(format!("docs_{count}.tsv"));
        docbench_model::write_corpus_file(&file_path, count, config.seed)?;
    }
    Ok(())
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Write tab-separated corpus files for the ingestion stand")]
struct Config {
    #[arg()]
    data_dir: Box<std::path::Path>,
    #[arg()]
    counts: Vec<usize>,
    #[arg(long, default_value_t = 17)]
    seed: u64,
}
