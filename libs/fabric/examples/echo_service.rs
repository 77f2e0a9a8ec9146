//! Answer every request with the request itself
//!
//! ```text
//! cargo run -p msgbus-fabric --example echo_service -- demo-configs/ipc.json echo_service
//! ```

use msgbus_fabric::{Client, Config, ReceiveTimeout};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("MSGBUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(config_file), Some(name)) = (args.next(), args.next()) else {
        eprintln!("usage: echo_service <config.json> <service name>");
        std::process::exit(2);
    };

    let client = Client::new(Config::from_file(&config_file)?)?;
    let mut service = client.new_service(&name).await?;
    info!(service = %name, "serving, ctrl-c to stop");

    loop {
        let request = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            request = service.receive_request(ReceiveTimeout::Block) => request,
        };
        match request {
            Ok(Some(request)) => {
                println!("-- Received request: {:?}", request.data());
                service.response(&request.into_value()).await?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "failed to receive request");
                break;
            }
        }
    }

    service.close();
    client.close();
    Ok(())
}
