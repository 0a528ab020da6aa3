use anyhow::Result;
use vegwatch::AnalysisReport;

/// Example: print the report shape clients receive for a completed job
fn main() -> Result<()> {
    println!("{}", AnalysisReport::demo().to_json()?);
    Ok(())
}
