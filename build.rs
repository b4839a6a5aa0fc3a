use anyhow::Result;
use vergen::EmitBuilder;

fn main() -> Result<()> {
    // The SHA ends up in `--version`. Outside a git checkout vergen emits
    // placeholder values and a cargo warning instead of failing.
    EmitBuilder::builder()
        .git_sha(true)
        .git_commit_date()
        .emit()?;
    Ok(())
}
