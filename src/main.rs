fn main() -> anyhow::Result<()> {
    spectrum_pipeline::run()
}
