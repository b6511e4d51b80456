mod app;

fn main() -> anyhow::Result<()> {
    app::run()
}
