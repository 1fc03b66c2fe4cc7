fn main() -> anyhow::Result<()> {
    esperanza_pos_lib::run()
}
