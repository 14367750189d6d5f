//! Redis-stream event bus.
//!
//! Streams are bounded (~10 000 entries, approximate trimming) and consumed
//! either through consumer groups (at-least-once, explicit ack) or through a
//! cursored tail read. Consumers are expected to be idempotent.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::Result;

/// Stream names shared by every service.
pub mod streams {
    pub const RAW: &str = "raw_messages";
    pub const SIGNALS: &str = "parsed_signals";
    pub const MGMT: &str = "mgmt_messages";
    pub const COMMANDS: &str = "trade_commands";
    pub const EVENTS: &str = "trade_events";
}

const STREAM_MAXLEN: usize = 10_000;

/// One entry read from a stream, fields decoded to strings.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Cheap-to-clone handle over a multiplexed Redis connection.
#[derive(Clone)]
pub struct Bus {
    conn: MultiplexedConnection,
}

impl Bus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        info!(url = %url, "Connected to Redis bus");
        Ok(Self { conn })
    }

    /// Append an entry, trimming the stream to ~10 000 entries.
    pub async fn publish(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(STREAM_MAXLEN), "*", fields)
            .await?;
        Ok(id)
    }

    /// Create a consumer group at the stream head, tolerating BUSYGROUP.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream, group, "0")
            .await
        {
            Ok(()) => {
                info!(stream = stream, group = group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read new entries for a consumer group, blocking up to `block_ms`.
    /// On NOGROUP the group is recreated and an empty batch is returned.
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let reply: StreamReadReply = match conn.xread_options(&[stream], &[">"], &opts).await {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                warn!(stream = stream, group = group, "NOGROUP — recreating consumer group");
                self.ensure_group(stream, group).await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(flatten_reply(reply))
    }

    pub async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    /// Non-grouped tail read from an explicit last-id cursor.
    pub async fn read_tail(
        &self,
        stream: &str,
        last_id: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default().count(count).block(block_ms);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[last_id], &opts).await?;
        Ok(flatten_reply(reply))
    }

    /// `SET key 1 NX EX ttl`; returns true when the key was newly set.
    pub async fn set_if_absent(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    /// Plain `SET key value EX ttl` (overwrites any previous value).
    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    pub async fn key_exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    /// INCRBYFLOAT, used for the daily PnL tally.
    pub async fn incr_float(&self, key: &str, delta: f64) -> Result<f64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, delta).await?)
    }
}

fn flatten_reply(reply: StreamReadReply) -> Vec<StreamMessage> {
    let mut out = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let mut fields = HashMap::with_capacity(entry.map.len());
            for (k, v) in &entry.map {
                if let Ok(s) = redis::from_redis_value::<String>(v) {
                    fields.insert(k.clone(), s);
                }
            }
            out.push(StreamMessage {
                id: entry.id.clone(),
                fields,
            });
        }
    }
    out
}
