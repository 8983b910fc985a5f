use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use contest::{broker::Broker, cache::Cache, config::Config, db};

use crate::sms::SmsClient;

pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub cache: Cache,
    pub broker: Broker,
    pub sms: SmsClient,
}

impl AppState {
    pub async fn new(config: Config) -> contest::Result<Arc<Self>> {
        let db = db::connect(&config.database).await?;
        info!("Database pool ready");

        let cache = Cache::connect(&config.redis).await?;
        cache.ping().await?;
        info!("Cache connection ready");

        let broker = Broker::connect(&config.broker).await?;
        broker.assert_queue(&config.broker.queue).await?;
        info!(queue = %config.broker.queue, "Broker topology asserted");

        let sms = SmsClient::new(&config.sms);

        Ok(Arc::new(Self {
            config,
            db,
            cache,
            broker,
            sms,
        }))
    }
}
