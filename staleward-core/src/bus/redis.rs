//! Redis streams producer. Each event becomes one stream entry
//! `XADD <topic> [MAXLEN ~ n] * key <host id> payload <json>`.

use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::{BusConnectionError, PublishError};

use super::{EventBus, EventProducer};

#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    max_len: Option<usize>,
}

impl fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventBus")
            .field("client", &"redis::Client")
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl RedisEventBus {
    pub fn open(
        redis_url: &str,
        max_len: Option<usize>,
    ) -> Result<Self, BusConnectionError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            BusConnectionError::Connect(format!("Failed to create Redis client: {e}"))
        })?;
        Ok(Self { client, max_len })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn connect(&self) -> Result<Box<dyn EventProducer>, BusConnectionError> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                BusConnectionError::Connect(format!("Failed to connect to Redis: {e}"))
            })?;
        info!("connected to redis event bus");
        Ok(Box::new(RedisProducer {
            conn: Some(conn),
            max_len: self.max_len,
        }))
    }
}

struct RedisProducer {
    conn: Option<ConnectionManager>,
    max_len: Option<usize>,
}

#[async_trait]
impl EventProducer for RedisProducer {
    async fn publish(
        &mut self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(PublishError::ConnectionUnusable(
                "producer closed".into(),
            ));
        };

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg("key").arg(key).arg("payload").arg(payload);

        cmd.query_async::<String>(conn)
            .await
            .map(|_entry_id| ())
            .map_err(classify_error)
    }

    /// `XADD` is acknowledged synchronously, so there is nothing buffered.
    async fn flush(&mut self) -> Result<(), PublishError> {
        match self.conn {
            Some(_) => Ok(()),
            None => Err(PublishError::ConnectionUnusable(
                "producer closed".into(),
            )),
        }
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        if self.conn.take().is_some() {
            info!("closed redis event bus producer");
        }
        Ok(())
    }
}

fn classify_error(err: redis::RedisError) -> PublishError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        PublishError::ConnectionUnusable(err.to_string())
    } else {
        PublishError::Rejected(err.to_string())
    }
}
