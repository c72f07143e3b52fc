#[cfg(target_os = "espidf")]
mod board;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    board::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("segclock runs on ESP-IDF targets; on the host use `cargo test`");
}
