fn main() -> anyhow::Result<()> {
    egressd_cmd::cmd::run()
}
