//! Climate sensor node. Builds for ESP-IDF with `--features esp32`; the
//! default build is a desktop simulation of the same session loop.

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
