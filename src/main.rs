use log::error;
use vaultd::{Server, ServerConfig};

fn main() {
    let config = ServerConfig::from_args();

    env_logger::Builder::new()
        .filter_level(config.log_level)
        .format_timestamp_nanos()
        .init();

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind {}: {e}", config.bind_addr);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
