use flagkit::{ClientConfig, EvaluationContext};

pub fn main() -> flagkit::Result<()> {
    // Configure env_logger to see flagkit logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("flagkit=debug")).init();

    let api_url =
        std::env::var("FLAGKIT_API_URL").unwrap_or_else(|_| "http://localhost:4242/api".to_owned());
    let mut config = ClientConfig::new("flagkit-demo", api_url);
    if let Ok(api_key) = std::env::var("FLAGKIT_API_KEY") {
        config.api_key(api_key);
    }
    let client = config.to_client()?;

    // Start a poller thread to fetch definitions from the server.
    let poller = client.start_poller_thread()?;

    // Block waiting for definitions. Until the first fetch, every feature is off unless it was
    // restored from a backup or bootstrap file.
    if let Err(err) = poller.wait_for_configuration() {
        eprintln!("could not fetch feature definitions: {err}");
    }

    let context = EvaluationContext::builder()
        .user_id("test-user")
        .property("region", "eu")
        .build();

    println!("features: {:?}", client.feature_names());
    println!(
        "checkout.new-flow enabled: {}",
        client.is_enabled("checkout.new-flow", &context)
    );
    println!(
        "pricing.experiment variant: {:?}",
        client.get_variant("pricing.experiment", &context)
    );

    poller.shutdown()
}
