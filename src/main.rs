use tokio_util::sync::CancellationToken;
use vvenc_bus::encoder::Encoder;
use vvenc_bus::backend::LookaheadEncoder;

mod config;
mod pipe;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("vvenc_bus", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let Some(path) = std::env::args().nth(1) else {
        let codec = Encoder::<LookaheadEncoder>::descriptor();
        eprintln!("usage: vvenc-pipe <job.json>");
        eprintln!("  {} ({})", codec.name, codec.long_name);
        std::process::exit(2);
    };
    let job = config::JobConfig::load(&path)?;
    log::info!(
        "encoding {} -> {} ({}x{} {} @ {})",
        job.input.display(),
        job.output.display(),
        job.settings.width,
        job.settings.height,
        job.settings.pixel_format,
        job.settings.frame_rate
    );

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, stopping encode");
            cancel_clone.cancel();
        }
    });

    let summary = pipe::run(job, cancel).await?;
    log::info!("done, {}", summary);
    Ok(())
}
