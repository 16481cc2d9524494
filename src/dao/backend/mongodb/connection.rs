use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::{MongoDaoError, MongoResult};

/// How long startup keeps pinging a MongoDB server that is still booting.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRetry {
    /// Pings attempted before giving up.
    pub max_attempts: u32,
    /// Pause after the first failed ping; doubled after each further failure.
    pub initial_delay: Duration,
    /// Upper bound for the pause between pings.
    pub max_delay: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ConnectRetry {
    /// Pause before the ping following `failed` failed attempts.
    fn delay_after(&self, failed: u32) -> Duration {
        let factor = 1u32 << failed.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Build a client for the games database and wait until the server answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
    retry: ConnectRetry,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut failed = 0;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => break,
            Err(err) => {
                failed += 1;
                if failed >= retry.max_attempts {
                    return Err(MongoDaoError::InitialPing {
                        attempts: failed,
                        source: err,
                    });
                }
                warn!(attempts = failed, error = %err, "MongoDB not reachable yet; retrying");
                sleep(retry.delay_after(failed)).await;
            }
        }
    }

    info!(database = database_name, attempts = failed + 1, "MongoDB answered ping");
    Ok((client, database))
}
