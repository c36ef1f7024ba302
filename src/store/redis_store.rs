//! Redis-backed store
//!
//! Each `StoreCommand` maps onto one Redis command. Transactions become an
//! atomic pipeline (MULTI ... EXEC) and bulk deletion runs as a Lua script
//! so it is a single server-side step.

use super::{MergeStore, Reply, StoreCommand, Transaction};
use crate::error::{StoreError, StoreResult};
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, RedisError, Value};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

/// Deletes every key matching any ARGV pattern; returns the count.
/// DEL is batched because unpack() is limited by the Lua stack size.
const DELETE_MATCHING_SCRIPT: &str = r#"
local deleted = 0
for i = 1, #ARGV do
  local keys = redis.call('KEYS', ARGV[i])
  for j = 1, #keys, 1000 do
    deleted = deleted + redis.call('DEL', unpack(keys, j, math.min(j + 999, #keys)))
  end
end
return deleted
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Store backed by a Redis server over a multiplexed connection
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `redis://host:port/db`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected to redis store");
        Ok(RedisStore { connection })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn to_cmd(command: &StoreCommand) -> Cmd {
    let mut cmd = redis::cmd(command.name());
    match command {
        StoreCommand::SAdd { key, member }
        | StoreCommand::SRem { key, member }
        | StoreCommand::SIsMember { key, member } => {
            cmd.arg(key.as_str()).arg(member.as_str());
        }
        StoreCommand::SMembers { key }
        | StoreCommand::LLen { key }
        | StoreCommand::Get { key }
        | StoreCommand::PTtl { key } => {
            cmd.arg(key.as_str());
        }
        StoreCommand::LPush { key, value } | StoreCommand::SetNx { key, value } => {
            cmd.arg(key.as_str()).arg(value.as_str());
        }
        StoreCommand::LRange { key, start, stop } => {
            cmd.arg(key.as_str()).arg(*start).arg(*stop);
        }
        StoreCommand::LRem { key, count, value } => {
            cmd.arg(key.as_str()).arg(*count).arg(value.as_str());
        }
        StoreCommand::SetNxPx { key, value, ttl_ms } => {
            cmd.arg(key.as_str())
                .arg(value.as_str())
                .arg("NX")
                .arg("PX")
                .arg(*ttl_ms);
        }
        StoreCommand::Del { keys } => {
            for key in keys {
                cmd.arg(key.as_str());
            }
        }
        StoreCommand::DeleteMatching { patterns } => {
            cmd.arg(DELETE_MATCHING_SCRIPT).arg(0);
            for pattern in patterns {
                cmd.arg(pattern.as_str());
            }
        }
    }
    cmd
}

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Okay => Reply::Ok,
        Value::Int(n) => Reply::Integer(n),
        Value::BulkString(bytes) => Reply::Bulk(bytes),
        Value::SimpleString(s) if s == "OK" => Reply::Ok,
        Value::SimpleString(s) => Reply::Bulk(s.into_bytes()),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect())
        }
        Value::Boolean(b) => Reply::Integer(b as i64),
        Value::ServerError(err) => Reply::Error(format!("{:?}", err)),
        other => Reply::Error(format!("unsupported reply: {:?}", other)),
    }
}

impl MergeStore for RedisStore {
    fn execute<'a>(
        &'a self,
        command: StoreCommand,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Reply>> + Send + 'a>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let value: Value = to_cmd(&command).query_async(&mut connection).await?;
            Ok(to_reply(value))
        })
    }

    fn execute_atomic<'a>(
        &'a self,
        transaction: Transaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for command in transaction.commands() {
                pipe.add_command(to_cmd(command));
            }

            let mut connection = self.connection.clone();
            let value: Value = pipe.query_async(&mut connection).await?;
            debug!(commands = transaction.len(), "transaction executed");

            match value {
                Value::Array(items) => {
                    transaction.complete(items.into_iter().map(to_reply).collect())
                }
                Value::Nil => Err(StoreError::Aborted),
                other => Err(StoreError::Protocol(format!(
                    "expected EXEC array, got {:?}",
                    other
                ))),
            }
        })
    }
}
