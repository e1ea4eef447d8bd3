#[cfg(feature = "capture")]
use midipipe_benchmarks::capture::benchmark_input_to_channel;
#[cfg(feature = "relay")]
use midipipe_benchmarks::relay::benchmark_channel_to_output;

fn main() {
    // Setup logger
    env_logger::builder()
        .filter_level(log::LevelFilter::Info) // Suppress everything below `info` for third-party modules.
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace) // Allow everything from current package
        .init();

    #[cfg(feature = "relay")]
    {
        log::info!("[benchmark_channel_to_output]");
        benchmark_channel_to_output(100_000);
    }

    #[cfg(feature = "capture")]
    {
        log::info!("[benchmark_input_to_channel]");
        benchmark_input_to_channel(100_000, 1_000);
    }
}
