use anyhow::Result;

fn main() -> Result<()> {
    topdown_pose::cli::run()
}
