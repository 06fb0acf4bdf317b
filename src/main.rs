use emustress::clap_args;
use tracing::{subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap_args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let subscriber = get_subscriber(default_filter.into());
    init_subscriber(subscriber);

    emustress::run(args).await
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false) // Optionally disable printing the target
        .pretty()
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    set_global_default(subscriber).expect("Failed to set subscriber");
}
