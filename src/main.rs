use anyhow::Result;

fn main() -> Result<()> {
    pipebox::cli::run()
}
